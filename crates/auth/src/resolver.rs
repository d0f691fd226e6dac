//! Effective-permission resolution (role defaults ∪ grants ∪ resource grants).

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use archive_core::{ArchiveError, ArchiveResult, IdentityId};

use crate::identity::Identity;
use crate::permissions::{Permission, ResourceRef};
use crate::roles::Role;
use crate::store::{IdentityStore, PermissionGrant};

/// Role matrix for editing another identity's profile.
///
/// Self-edits are always allowed; super admins edit anyone; admins edit anyone
/// but super admins; financial managers edit members of their own department.
pub fn role_can_edit(actor: &Identity, target: &Identity) -> bool {
    if actor.id == target.id {
        return true;
    }
    match actor.role {
        Role::SuperAdmin => true,
        Role::Admin => target.role != Role::SuperAdmin,
        Role::FinancialManager => actor.same_department(target),
        _ => false,
    }
}

pub struct PermissionResolver<S> {
    store: Arc<S>,
}

impl<S> Clone for PermissionResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: IdentityStore> PermissionResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Every identity that may still sign in; candidates for notifications.
    pub fn active_identities(&self) -> ArchiveResult<Vec<Identity>> {
        self.store.active_identities()
    }

    fn identity(&self, identity_id: IdentityId) -> ArchiveResult<Option<Identity>> {
        self.store.get(identity_id)
    }

    /// Role defaults plus global grants. Unknown identities resolve to nothing.
    pub fn resolve(&self, identity_id: IdentityId) -> ArchiveResult<BTreeSet<Permission>> {
        let Some(identity) = self.identity(identity_id)? else {
            return Ok(BTreeSet::new());
        };

        let mut permissions: BTreeSet<Permission> = identity
            .role
            .default_permissions()
            .iter()
            .map(|p| Permission::new(*p))
            .collect();

        for grant in self.store.grants(identity_id)? {
            if grant.resource.is_none() {
                permissions.insert(grant.permission);
            }
        }
        Ok(permissions)
    }

    pub fn has_permission(
        &self,
        identity_id: IdentityId,
        permission: &str,
        resource: Option<&ResourceRef>,
    ) -> ArchiveResult<bool> {
        let Some(identity) = self.identity(identity_id)? else {
            return Ok(false);
        };
        if identity.role.is_bypass() {
            return Ok(true);
        }
        if identity.role.grants(permission) {
            return Ok(true);
        }

        let granted = self.store.grants(identity_id)?.into_iter().any(|grant| {
            grant.permission.as_str() == permission
                && match (&grant.resource, resource) {
                    (None, _) => true,
                    (Some(bound), Some(wanted)) => bound == wanted,
                    (Some(_), None) => false,
                }
        });
        Ok(granted)
    }

    /// `has_permission`, turned into `PermissionDenied` on refusal.
    pub fn require(
        &self,
        identity_id: IdentityId,
        permission: &str,
        resource: Option<&ResourceRef>,
    ) -> ArchiveResult<()> {
        if self.has_permission(identity_id, permission, resource)? {
            Ok(())
        } else {
            Err(ArchiveError::denied(format!("missing permission '{permission}'")))
        }
    }

    pub fn can_edit(&self, actor_id: IdentityId, target_id: IdentityId) -> ArchiveResult<bool> {
        let (Some(actor), Some(target)) = (self.identity(actor_id)?, self.identity(target_id)?) else {
            return Ok(false);
        };
        Ok(role_can_edit(&actor, &target))
    }

    pub fn grant(
        &self,
        identity_id: IdentityId,
        permission: Permission,
        resource: Option<ResourceRef>,
        granted_by: Option<IdentityId>,
        at: DateTime<Utc>,
    ) -> ArchiveResult<()> {
        if self.identity(identity_id)?.is_none() {
            return Err(ArchiveError::not_found());
        }
        self.store.add_grant(PermissionGrant {
            identity_id,
            permission,
            resource,
            granted_by,
            granted_at: at,
        })
    }

    pub fn revoke(
        &self,
        identity_id: IdentityId,
        permission: &Permission,
        resource: Option<&ResourceRef>,
    ) -> ArchiveResult<bool> {
        self.store.remove_grant(identity_id, permission, resource)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authorization explanation (audit trail)
    // ─────────────────────────────────────────────────────────────────────────

    /// Explain why a permission check would be granted or denied.
    pub fn explain(
        &self,
        identity_id: IdentityId,
        permission: &str,
        resource: Option<&ResourceRef>,
    ) -> ArchiveResult<AuthorizationExplanation> {
        let Some(identity) = self.identity(identity_id)? else {
            return Ok(AuthorizationExplanation {
                required_permission: permission.to_string(),
                resource: resource.map(ToString::to_string),
                granted: false,
                reason: format!("Identity {identity_id} does not exist"),
                principal: None,
                denial_reason: Some(DenialReason {
                    kind: DenialKind::UnknownIdentity,
                    message: "No identity with this id".to_string(),
                    suggestions: vec![],
                }),
            });
        };

        let grants = self.store.grants(identity_id)?;
        let effective: Vec<String> = self
            .resolve(identity_id)?
            .into_iter()
            .map(|p| p.as_str().to_string())
            .collect();
        let resource_grants: Vec<String> = grants
            .iter()
            .filter_map(|g| g.resource.as_ref().map(|r| format!("{}@{}", g.permission, r)))
            .collect();

        let principal = PrincipalState {
            identity_id,
            role: identity.role.as_str().to_string(),
            bypass: identity.role.is_bypass(),
            effective_permissions: effective.clone(),
            resource_grants,
        };

        let by_role = identity.role.grants(permission);
        let by_global_grant = grants
            .iter()
            .any(|g| g.resource.is_none() && g.permission.as_str() == permission);
        let by_resource_grant = resource.is_some_and(|wanted| {
            grants
                .iter()
                .any(|g| g.permission.as_str() == permission && g.resource.as_ref() == Some(wanted))
        });

        let reason = if identity.role.is_bypass() {
            Some(format!("Role '{}' bypasses permission checks", identity.role))
        } else if by_role {
            Some(format!("Role '{}' grants '{permission}' by default", identity.role))
        } else if by_global_grant {
            Some(format!("Identity holds an explicit grant for '{permission}'"))
        } else if by_resource_grant {
            Some(format!(
                "Identity holds '{permission}' for {}",
                resource.map(ToString::to_string).unwrap_or_default()
            ))
        } else {
            None
        };

        if let Some(reason) = reason {
            return Ok(AuthorizationExplanation {
                required_permission: permission.to_string(),
                resource: resource.map(ToString::to_string),
                granted: true,
                reason,
                principal: Some(principal),
                denial_reason: None,
            });
        }

        let granting_roles: Vec<&str> = Role::ALL
            .iter()
            .filter(|role| role.is_bypass() || role.grants(permission))
            .map(|role| role.as_str())
            .collect();

        let mut suggestions = vec![
            format!("Grant '{permission}' directly to the identity"),
            format!("Assign one of the roles that include it: {granting_roles:?}"),
        ];
        if let Some(wanted) = resource {
            suggestions.push(format!("Grant '{permission}' scoped to {wanted}"));
        }

        Ok(AuthorizationExplanation {
            required_permission: permission.to_string(),
            resource: resource.map(ToString::to_string),
            granted: false,
            reason: format!(
                "Identity does not have permission '{permission}'. Current permissions: {effective:?}"
            ),
            principal: Some(principal),
            denial_reason: Some(DenialReason {
                kind: DenialKind::MissingPermission,
                message: format!("Missing required permission: '{permission}'"),
                suggestions,
            }),
        })
    }
}

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_permission: String,
    pub resource: Option<String>,
    pub granted: bool,
    pub reason: String,
    pub principal: Option<PrincipalState>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub identity_id: IdentityId,
    pub role: String,
    pub bypass: bool,
    pub effective_permissions: Vec<String>,
    pub resource_grants: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    UnknownIdentity,
    MissingPermission,
}
