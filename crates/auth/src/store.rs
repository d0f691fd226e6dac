//! Persistence seam for identities, grants and credential side tables.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use archive_core::{ArchiveError, ArchiveResult, ClientFingerprint, IdentityId, Transactional, TxCell};

use crate::identity::Identity;
use crate::permissions::{Permission, ResourceRef};

/// Explicit permission granted to one identity, optionally bound to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub identity_id: IdentityId,
    pub permission: Permission,
    pub resource: Option<ResourceRef>,
    pub granted_by: Option<IdentityId>,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHistoryEntry {
    pub identity_id: IdentityId,
    pub password_hash: String,
    pub recorded_at: DateTime<Utc>,
}

/// A failed sign-in, recorded whether or not the identifier exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub identifier: String,
    pub origin: ClientFingerprint,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetTokenRecord {
    pub id: Uuid,
    pub email: String,
    /// SHA-256 of the token; the token itself is never stored.
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberTokenRecord {
    pub identity_id: IdentityId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Identity persistence.
///
/// Implementations must make writes issued between `begin` and `commit` atomic.
pub trait IdentityStore: Transactional + Send + Sync {
    fn get(&self, id: IdentityId) -> ArchiveResult<Option<Identity>>;
    fn find_by_identifier(&self, identifier: &str) -> ArchiveResult<Option<Identity>>;
    fn find_by_email(&self, email: &str) -> ArchiveResult<Option<Identity>>;
    /// Identities whose status still allows sign-in, by username.
    fn active_identities(&self) -> ArchiveResult<Vec<Identity>>;
    /// Fails with `Validation` when username, email or employee id is taken.
    fn insert(&self, identity: &Identity) -> ArchiveResult<()>;
    fn update(&self, identity: &Identity) -> ArchiveResult<()>;

    fn grants(&self, identity_id: IdentityId) -> ArchiveResult<Vec<PermissionGrant>>;
    fn add_grant(&self, grant: PermissionGrant) -> ArchiveResult<()>;
    fn remove_grant(
        &self,
        identity_id: IdentityId,
        permission: &Permission,
        resource: Option<&ResourceRef>,
    ) -> ArchiveResult<bool>;

    /// Newest first.
    fn password_history(&self, identity_id: IdentityId) -> ArchiveResult<Vec<PasswordHistoryEntry>>;
    /// Appends and purges everything beyond the `keep` most recent entries.
    fn push_password_history(&self, entry: PasswordHistoryEntry, keep: usize) -> ArchiveResult<()>;

    fn record_failed_attempt(&self, attempt: FailedAttempt) -> ArchiveResult<()>;
    fn failed_attempts(&self, identifier: &str) -> ArchiveResult<Vec<FailedAttempt>>;

    /// Replaces any earlier token issued to the same address.
    fn insert_reset_token(&self, token: ResetTokenRecord) -> ArchiveResult<()>;
    fn find_reset_token(&self, email: &str, token_hash: &str) -> ArchiveResult<Option<ResetTokenRecord>>;
    /// Fails with `TokenExpiredOrInvalid` when the token was already used.
    fn mark_reset_token_used(&self, id: Uuid) -> ArchiveResult<()>;

    fn insert_remember_token(&self, token: RememberTokenRecord) -> ArchiveResult<()>;
    fn find_remember_token(&self, token_hash: &str) -> ArchiveResult<Option<RememberTokenRecord>>;
    fn delete_remember_token(&self, token_hash: &str) -> ArchiveResult<()>;

    /// Remove used or expired reset tokens and expired remember tokens.
    fn prune_expired_tokens(&self, now: DateTime<Utc>) -> ArchiveResult<usize>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory implementation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct IdentityTables {
    identities: HashMap<IdentityId, Identity>,
    grants: Vec<PermissionGrant>,
    history: Vec<PasswordHistoryEntry>,
    failed_attempts: Vec<FailedAttempt>,
    reset_tokens: Vec<ResetTokenRecord>,
    remember_tokens: Vec<RememberTokenRecord>,
}

impl IdentityTables {
    fn conflict(&self, candidate: &Identity) -> Option<&'static str> {
        self.identities
            .values()
            .filter(|existing| existing.id != candidate.id)
            .find_map(|existing| {
                if existing.username == candidate.username {
                    Some("username already in use")
                } else if existing.email.eq_ignore_ascii_case(&candidate.email) {
                    Some("email already in use")
                } else if candidate.employee_id.is_some() && existing.employee_id == candidate.employee_id {
                    Some("employee id already in use")
                } else {
                    None
                }
            })
    }
}

/// In-memory identity store for tests/dev.
#[derive(Debug)]
pub struct InMemoryIdentityStore {
    tables: TxCell<IdentityTables>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self {
            tables: TxCell::new(IdentityTables::default()),
        }
    }
}

impl Default for InMemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Transactional for InMemoryIdentityStore {
    fn begin(&self) -> ArchiveResult<()> {
        self.tables.begin()
    }

    fn commit(&self) -> ArchiveResult<()> {
        self.tables.commit()
    }

    fn rollback(&self) -> ArchiveResult<()> {
        self.tables.rollback()
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn get(&self, id: IdentityId) -> ArchiveResult<Option<Identity>> {
        self.tables.read(|t| t.identities.get(&id).cloned())
    }

    fn find_by_identifier(&self, identifier: &str) -> ArchiveResult<Option<Identity>> {
        self.tables.read(|t| {
            t.identities
                .values()
                .find(|i| i.matches_identifier(identifier))
                .cloned()
        })
    }

    fn find_by_email(&self, email: &str) -> ArchiveResult<Option<Identity>> {
        self.tables.read(|t| {
            t.identities
                .values()
                .find(|i| i.email.eq_ignore_ascii_case(email))
                .cloned()
        })
    }

    fn active_identities(&self) -> ArchiveResult<Vec<Identity>> {
        self.tables.read(|t| {
            let mut active: Vec<Identity> = t
                .identities
                .values()
                .filter(|i| i.status.can_authenticate())
                .cloned()
                .collect();
            active.sort_by(|a, b| a.username.cmp(&b.username));
            active
        })
    }

    fn insert(&self, identity: &Identity) -> ArchiveResult<()> {
        self.tables.write(|t| {
            if t.identities.contains_key(&identity.id) {
                return Err(ArchiveError::validation("identity already exists"));
            }
            if let Some(reason) = t.conflict(identity) {
                return Err(ArchiveError::validation(reason));
            }
            t.identities.insert(identity.id, identity.clone());
            Ok(())
        })
    }

    fn update(&self, identity: &Identity) -> ArchiveResult<()> {
        self.tables.write(|t| {
            if !t.identities.contains_key(&identity.id) {
                return Err(ArchiveError::not_found());
            }
            if let Some(reason) = t.conflict(identity) {
                return Err(ArchiveError::validation(reason));
            }
            t.identities.insert(identity.id, identity.clone());
            Ok(())
        })
    }

    fn grants(&self, identity_id: IdentityId) -> ArchiveResult<Vec<PermissionGrant>> {
        self.tables.read(|t| {
            t.grants
                .iter()
                .filter(|g| g.identity_id == identity_id)
                .cloned()
                .collect()
        })
    }

    fn add_grant(&self, grant: PermissionGrant) -> ArchiveResult<()> {
        self.tables.write(|t| {
            let duplicate = t.grants.iter().any(|g| {
                g.identity_id == grant.identity_id
                    && g.permission == grant.permission
                    && g.resource == grant.resource
            });
            if !duplicate {
                t.grants.push(grant);
            }
            Ok(())
        })
    }

    fn remove_grant(
        &self,
        identity_id: IdentityId,
        permission: &Permission,
        resource: Option<&ResourceRef>,
    ) -> ArchiveResult<bool> {
        self.tables.write(|t| {
            let before = t.grants.len();
            t.grants.retain(|g| {
                !(g.identity_id == identity_id && &g.permission == permission && g.resource.as_ref() == resource)
            });
            Ok(t.grants.len() != before)
        })
    }

    fn password_history(&self, identity_id: IdentityId) -> ArchiveResult<Vec<PasswordHistoryEntry>> {
        self.tables.read(|t| {
            let mut entries: Vec<PasswordHistoryEntry> = t
                .history
                .iter()
                .filter(|e| e.identity_id == identity_id)
                .cloned()
                .collect();
            entries.reverse();
            entries
        })
    }

    fn push_password_history(&self, entry: PasswordHistoryEntry, keep: usize) -> ArchiveResult<()> {
        self.tables.write(|t| {
            let identity_id = entry.identity_id;
            t.history.push(entry);

            let total = t.history.iter().filter(|e| e.identity_id == identity_id).count();
            let mut excess = total.saturating_sub(keep);
            // Oldest entries sit first.
            t.history.retain(|e| {
                if excess > 0 && e.identity_id == identity_id {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
            Ok(())
        })
    }

    fn record_failed_attempt(&self, attempt: FailedAttempt) -> ArchiveResult<()> {
        self.tables.write(|t| {
            t.failed_attempts.push(attempt);
            Ok(())
        })
    }

    fn failed_attempts(&self, identifier: &str) -> ArchiveResult<Vec<FailedAttempt>> {
        self.tables.read(|t| {
            t.failed_attempts
                .iter()
                .filter(|a| a.identifier == identifier)
                .cloned()
                .collect()
        })
    }

    fn insert_reset_token(&self, token: ResetTokenRecord) -> ArchiveResult<()> {
        self.tables.write(|t| {
            t.reset_tokens.retain(|r| !r.email.eq_ignore_ascii_case(&token.email));
            t.reset_tokens.push(token);
            Ok(())
        })
    }

    fn find_reset_token(&self, email: &str, token_hash: &str) -> ArchiveResult<Option<ResetTokenRecord>> {
        self.tables.read(|t| {
            t.reset_tokens
                .iter()
                .find(|r| r.email.eq_ignore_ascii_case(email) && r.token_hash == token_hash)
                .cloned()
        })
    }

    fn mark_reset_token_used(&self, id: Uuid) -> ArchiveResult<()> {
        self.tables.write(|t| {
            let token = t
                .reset_tokens
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(ArchiveError::RecordNotFound)?;
            if token.used {
                return Err(ArchiveError::TokenExpiredOrInvalid);
            }
            token.used = true;
            Ok(())
        })
    }

    fn insert_remember_token(&self, token: RememberTokenRecord) -> ArchiveResult<()> {
        self.tables.write(|t| {
            t.remember_tokens.push(token);
            Ok(())
        })
    }

    fn find_remember_token(&self, token_hash: &str) -> ArchiveResult<Option<RememberTokenRecord>> {
        self.tables.read(|t| {
            t.remember_tokens
                .iter()
                .find(|r| r.token_hash == token_hash)
                .cloned()
        })
    }

    fn delete_remember_token(&self, token_hash: &str) -> ArchiveResult<()> {
        self.tables.write(|t| {
            t.remember_tokens.retain(|r| r.token_hash != token_hash);
            Ok(())
        })
    }

    fn prune_expired_tokens(&self, now: DateTime<Utc>) -> ArchiveResult<usize> {
        self.tables.write(|t| {
            let before = t.reset_tokens.len() + t.remember_tokens.len();
            t.reset_tokens.retain(|r| !r.used && r.expires_at > now);
            t.remember_tokens.retain(|r| r.expires_at > now);
            Ok(before - t.reset_tokens.len() - t.remember_tokens.len())
        })
    }
}
