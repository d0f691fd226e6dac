//! Identity Manager: sign-in, session validation and the password lifecycle.
//!
//! ```text
//! authenticate ──► lock check ──► verify secret ──► status ──► password age
//!                      │               │                           │
//!                AccountLocked   InvalidCredentials        PasswordChangeRequired
//!                                (+ lockout counter)
//!                                                     success ──► new session id
//! ```
//!
//! Every authentication event writes exactly one audit record. Existing
//! identity rows are changed only through `amend`, which re-reads the row
//! inside a store transaction; concurrent sign-ins and administrative edits
//! never write back a stale copy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use archive_core::{ArchiveError, ArchiveResult, ClientFingerprint, Clock, IdentityId, transaction};
use archive_events::{
    AuditEventType, AuditLog, AuditRecord, NotificationKind, Notifier, notify, record_or_warn,
};

use crate::config::AuthConfig;
use crate::context::RequestContext;
use crate::credentials::CredentialVault;
use crate::identity::{Identity, IdentityStatus, IdentityUpdate, NewIdentity};
use crate::lockout::{FailureOutcome, LockoutPolicy};
use crate::permissions::{Permission, ResourceRef, names};
use crate::resolver::PermissionResolver;
use crate::roles::Role;
use crate::session::{Session, SessionId, SessionStore};
use crate::store::{
    FailedAttempt, IdentityStore, PasswordHistoryEntry, RememberTokenRecord, ResetTokenRecord,
};
use crate::tokens::{generate_token, hash_token};

/// Returned by `request_password_reset` whether or not the address is known.
pub const RESET_REQUEST_ACK: &str =
    "If the address belongs to an account, a password reset link has been sent.";

#[derive(Debug, Clone)]
pub struct LoginRequest {
    /// Username, email or employee id.
    pub identifier: String,
    pub secret: String,
    pub remember: bool,
    pub fingerprint: ClientFingerprint,
    /// Pre-authentication session to discard.
    pub previous_session: Option<SessionId>,
}

impl LoginRequest {
    pub fn new(
        identifier: impl Into<String>,
        secret: impl Into<String>,
        fingerprint: ClientFingerprint,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
            remember: false,
            fingerprint,
            previous_session: None,
        }
    }

    pub fn remember_me(mut self) -> Self {
        self.remember = true;
        self
    }

    pub fn replacing(mut self, previous: SessionId) -> Self {
        self.previous_session = Some(previous);
        self
    }
}

#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub session_id: SessionId,
    pub identity_id: IdentityId,
    pub role: Role,
    /// Plain remember-me token; only its digest is stored.
    pub remember_token: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Authenticated(AuthenticatedSession),
    /// Secret was correct but is too old; no session was opened.
    PasswordChangeRequired { identity_id: IdentityId },
}

pub struct IdentityManager<S, T> {
    store: Arc<S>,
    sessions: Arc<T>,
    vault: CredentialVault,
    lockout: LockoutPolicy,
    resolver: PermissionResolver<S>,
    config: AuthConfig,
    audit: Arc<dyn AuditLog>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl<S: IdentityStore, T: SessionStore> IdentityManager<S, T> {
    pub fn new(
        store: Arc<S>,
        sessions: Arc<T>,
        config: AuthConfig,
        audit: Arc<dyn AuditLog>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> ArchiveResult<Self> {
        let vault = CredentialVault::new(&config.hashing, config.password.clone())?;
        let lockout = LockoutPolicy::from_settings(&config.lockout);
        let resolver = PermissionResolver::new(Arc::clone(&store));
        Ok(Self {
            store,
            sessions,
            vault,
            lockout,
            resolver,
            config,
            audit,
            notifier,
            clock,
        })
    }

    pub fn resolver(&self) -> &PermissionResolver<S> {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn audit(&self, entry: AuditRecord) {
        record_or_warn(self.audit.as_ref(), entry);
    }

    fn record_failed_attempt(&self, identifier: &str, origin: &ClientFingerprint, now: DateTime<Utc>) {
        let attempt = FailedAttempt {
            identifier: identifier.to_lowercase(),
            origin: origin.clone(),
            attempted_at: now,
        };
        if let Err(err) = self.store.record_failed_attempt(attempt) {
            tracing::error!(error = %err, "failed to record failed attempt");
        }
    }

    /// Re-read `identity_id`, apply `change` and write the row back, all in one transaction.
    fn amend<R>(
        &self,
        identity_id: IdentityId,
        change: impl FnOnce(&mut Identity) -> ArchiveResult<R>,
    ) -> ArchiveResult<(Identity, R)> {
        transaction(self.store.as_ref(), || {
            let mut identity = self.store.get(identity_id)?.ok_or(ArchiveError::RecordNotFound)?;
            let outcome = change(&mut identity)?;
            self.store.update(&identity)?;
            Ok((identity, outcome))
        })
    }

    fn deny(&self, ctx: &RequestContext, action: &str, err: ArchiveError) -> ArchiveError {
        self.audit(
            AuditRecord::new(AuditEventType::PermissionDenied, self.clock.now())
                .by(ctx.identity_id())
                .details(json!({ "action": action, "reason": err.to_string() }))
                .from_origin(ctx.fingerprint()),
        );
        tracing::warn!(actor = %ctx.identity_id(), action, "permission denied");
        err
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sign-in and sessions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn authenticate(&self, request: LoginRequest) -> ArchiveResult<AuthOutcome> {
        let now = self.clock.now();
        let identifier = request.identifier.trim();
        if identifier.is_empty() || request.secret.is_empty() {
            return Err(ArchiveError::validation("username and password are required"));
        }
        let origin = &request.fingerprint;

        let Some(identity) = self.store.find_by_identifier(identifier)? else {
            self.vault.verify_decoy(&request.secret);
            self.record_failed_attempt(identifier, origin, now);
            self.audit(
                AuditRecord::new(AuditEventType::LoginFailed, now)
                    .details(json!({ "identifier": identifier, "reason": "unknown_identifier" }))
                    .from_origin(origin),
            );
            tracing::info!(identifier, "login failed");
            return Err(ArchiveError::InvalidCredentials);
        };

        if let Some(until) = identity.locked_until.filter(|until| *until > now) {
            self.record_failed_attempt(identifier, origin, now);
            self.audit(
                AuditRecord::new(AuditEventType::LoginBlocked, now)
                    .by(identity.id)
                    .details(json!({ "identifier": identifier, "locked_until": until }))
                    .from_origin(origin),
            );
            tracing::warn!(identity = %identity.id, %until, "login attempt on locked account");
            return Err(ArchiveError::AccountLocked(
                until.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            ));
        }

        if !self.vault.verify(&request.secret, &identity.password_hash) {
            let (identity, outcome) =
                self.amend(identity.id, |fresh| Ok(self.lockout.register_failure(fresh, now)))?;
            self.record_failed_attempt(identifier, origin, now);

            let (attempts, locked_until) = match outcome {
                FailureOutcome::Counted { attempts } => (attempts, None),
                FailureOutcome::Locked { attempts, until } => (attempts, Some(until)),
            };
            self.audit(
                AuditRecord::new(AuditEventType::LoginFailed, now)
                    .by(identity.id)
                    .details(json!({
                        "identifier": identifier,
                        "reason": "wrong_secret",
                        "attempts": attempts,
                        "locked_until": locked_until,
                    }))
                    .from_origin(origin),
            );

            if let Some(until) = locked_until {
                tracing::warn!(identity = %identity.id, %until, attempts, "account locked");
                notify(
                    self.notifier.as_ref(),
                    identity.id,
                    NotificationKind::AccountLocked,
                    json!({ "locked_until": until, "attempts": attempts, "address": origin.address }),
                );
            } else {
                tracing::info!(identity = %identity.id, attempts, "login failed");
            }
            return Err(ArchiveError::InvalidCredentials);
        }

        if !identity.status.can_authenticate() {
            self.audit(
                AuditRecord::new(AuditEventType::LoginFailed, now)
                    .by(identity.id)
                    .details(json!({ "reason": "status", "status": identity.status.as_str() }))
                    .from_origin(origin),
            );
            return Err(ArchiveError::AccountNotActive(
                identity.status.refusal_message().to_string(),
            ));
        }

        if self.vault.is_expired(identity.password_changed_at, now) {
            self.audit(
                AuditRecord::new(AuditEventType::PasswordChangeRequired, now)
                    .by(identity.id)
                    .from_origin(origin),
            );
            tracing::info!(identity = %identity.id, "password expired; change required");
            return Ok(AuthOutcome::PasswordChangeRequired { identity_id: identity.id });
        }

        let (session, identity) = self
            .open_session(identity.id, origin.clone(), request.previous_session.as_ref(), now)
            .inspect_err(|err| {
                self.audit(
                    AuditRecord::new(AuditEventType::LoginFailed, now)
                        .by(identity.id)
                        .details(json!({ "reason": err.kind() }))
                        .from_origin(origin),
                );
            })?;
        let remember_token = if request.remember {
            Some(self.issue_remember_token(identity.id, now)?)
        } else {
            None
        };

        self.audit(
            AuditRecord::new(AuditEventType::LoginSuccess, now)
                .by(identity.id)
                .details(json!({ "remember": request.remember }))
                .from_origin(origin),
        );
        tracing::info!(identity = %identity.id, role = %identity.role, "login succeeded");

        Ok(AuthOutcome::Authenticated(AuthenticatedSession {
            session_id: session.id,
            identity_id: identity.id,
            role: identity.role,
            remember_token,
        }))
    }

    /// The session is saved before the row is stamped: a suspension committed
    /// first fails the stamp, one committed later finds the session and closes it.
    fn open_session(
        &self,
        identity_id: IdentityId,
        fingerprint: ClientFingerprint,
        previous: Option<&SessionId>,
        now: DateTime<Utc>,
    ) -> ArchiveResult<(Session, Identity)> {
        if let Some(previous) = previous {
            self.sessions.destroy(previous)?;
        }
        match self.sessions.purge_idle(now - self.config.session.idle_timeout()) {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "idle sessions purged"),
            Err(err) => tracing::warn!(error = %err, "failed to purge idle sessions"),
        }

        let session = Session::start(identity_id, fingerprint, now);
        self.sessions.save(session.clone())?;

        let stamped = self.amend(identity_id, |fresh| {
            if !fresh.status.can_authenticate() {
                return Err(ArchiveError::AccountNotActive(
                    fresh.status.refusal_message().to_string(),
                ));
            }
            self.lockout.register_success(fresh);
            fresh.last_login = Some(now);
            fresh.last_activity = Some(now);
            Ok(())
        });
        match stamped {
            Ok((identity, ())) => Ok((session, identity)),
            Err(err) => {
                if let Err(destroy_err) = self.sessions.destroy(&session.id) {
                    tracing::error!(error = %destroy_err, "failed to discard refused session");
                }
                Err(err)
            }
        }
    }

    fn prune_tokens(&self, now: DateTime<Utc>) {
        if let Err(err) = self.store.prune_expired_tokens(now) {
            tracing::warn!(error = %err, "failed to prune expired tokens");
        }
    }

    fn issue_remember_token(&self, identity_id: IdentityId, now: DateTime<Utc>) -> ArchiveResult<String> {
        self.prune_tokens(now);
        let token = generate_token();
        self.store.insert_remember_token(RememberTokenRecord {
            identity_id,
            token_hash: hash_token(&token),
            expires_at: now + self.config.session.remember_me_ttl(),
        })?;
        Ok(token)
    }

    /// Resolve a session into a request context, or fail closed.
    pub fn validate_session(
        &self,
        session_id: &SessionId,
        fingerprint: &ClientFingerprint,
    ) -> ArchiveResult<RequestContext> {
        let now = self.clock.now();
        let session = match self.sessions.load(session_id) {
            Ok(Some(session)) => session,
            Ok(None) => return Err(ArchiveError::SessionInvalid),
            Err(ArchiveError::SessionInvalid) => {
                self.audit(
                    AuditRecord::new(AuditEventType::SessionInvalidated, now)
                        .details(json!({ "reason": "integrity" }))
                        .from_origin(fingerprint),
                );
                return Err(ArchiveError::SessionInvalid);
            }
            Err(err) => return Err(err),
        };

        if session.fingerprint != *fingerprint {
            return Err(self.invalidate(&session, "fingerprint_mismatch", fingerprint, now));
        }
        if now - session.last_activity >= self.config.session.idle_timeout() {
            return Err(self.invalidate(&session, "expired", fingerprint, now));
        }
        let touched = self.amend(session.identity_id, |fresh| {
            if !fresh.status.can_authenticate() {
                return Err(ArchiveError::SessionInvalid);
            }
            fresh.last_activity = Some(now);
            Ok(())
        });
        let identity = match touched {
            Ok((identity, ())) => identity,
            Err(ArchiveError::SessionInvalid | ArchiveError::RecordNotFound) => {
                return Err(self.invalidate(&session, "identity_unavailable", fingerprint, now));
            }
            Err(err) => return Err(err),
        };
        self.sessions.touch(session_id, now)?;

        Ok(RequestContext::new(session.id, identity, fingerprint.clone(), now))
    }

    fn invalidate(
        &self,
        session: &Session,
        reason: &str,
        presented: &ClientFingerprint,
        now: DateTime<Utc>,
    ) -> ArchiveError {
        if let Err(err) = self.sessions.destroy(&session.id) {
            tracing::error!(error = %err, "failed to destroy invalid session");
        }
        self.audit(
            AuditRecord::new(AuditEventType::SessionInvalidated, now)
                .by(session.identity_id)
                .details(json!({ "reason": reason }))
                .from_origin(presented),
        );
        tracing::warn!(identity = %session.identity_id, reason, "session invalidated");
        ArchiveError::SessionInvalid
    }

    /// Idempotent; never fails.
    pub fn end_session(&self, session_id: &SessionId, remember_token: Option<&str>) {
        let session = self.sessions.load(session_id).ok().flatten();

        if let Err(err) = self.sessions.destroy(session_id) {
            tracing::warn!(error = %err, "failed to destroy session on logout");
        }
        if let Some(token) = remember_token {
            if let Err(err) = self.store.delete_remember_token(&hash_token(token)) {
                tracing::warn!(error = %err, "failed to clear remember token");
            }
        }

        if let Some(session) = session {
            self.audit(
                AuditRecord::new(AuditEventType::Logout, self.clock.now())
                    .by(session.identity_id)
                    .from_origin(&session.fingerprint),
            );
            tracing::info!(identity = %session.identity_id, "logged out");
        }
    }

    /// Exchange a remember-me token for a fresh session. The token is rotated.
    pub fn resume_with_remember_token(
        &self,
        token: &str,
        fingerprint: ClientFingerprint,
    ) -> ArchiveResult<AuthenticatedSession> {
        let now = self.clock.now();
        let token_hash = hash_token(token);
        let Some(record) = self.store.find_remember_token(&token_hash)? else {
            return Err(ArchiveError::SessionInvalid);
        };
        if record.expires_at <= now {
            self.store.delete_remember_token(&token_hash)?;
            return Err(ArchiveError::SessionInvalid);
        }

        let identity = match self.store.get(record.identity_id)? {
            Some(identity)
                if identity.status.can_authenticate()
                    && !identity.is_locked(now)
                    && !self.vault.is_expired(identity.password_changed_at, now) =>
            {
                identity
            }
            _ => return Err(ArchiveError::SessionInvalid),
        };

        self.store.delete_remember_token(&token_hash)?;
        let (session, identity) = self.open_session(identity.id, fingerprint.clone(), None, now)?;
        let remember_token = self.issue_remember_token(identity.id, now)?;

        self.audit(
            AuditRecord::new(AuditEventType::LoginSuccess, now)
                .by(identity.id)
                .details(json!({ "method": "remember_token" }))
                .from_origin(&fingerprint),
        );

        Ok(AuthenticatedSession {
            session_id: session.id,
            identity_id: identity.id,
            role: identity.role,
            remember_token: Some(remember_token),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Password lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    pub fn change_password(
        &self,
        identity_id: IdentityId,
        current: &str,
        new_secret: &str,
        confirmation: &str,
    ) -> ArchiveResult<()> {
        let now = self.clock.now();
        if new_secret != confirmation {
            return Err(ArchiveError::validation("new password and confirmation do not match"));
        }
        self.vault.check_strength(new_secret)?;

        let identity = self.store.get(identity_id)?.ok_or(ArchiveError::RecordNotFound)?;
        if !self.vault.verify(current, &identity.password_hash) {
            return Err(ArchiveError::InvalidCredentials);
        }
        let history = self.store.password_history(identity_id)?;
        self.vault.ensure_not_reused(new_secret, &identity.password_hash, &history)?;

        self.replace_password(identity_id, &identity.password_hash, new_secret, now, || Ok(()))?;

        notify(
            self.notifier.as_ref(),
            identity_id,
            NotificationKind::PasswordChanged,
            json!({ "changed_at": now }),
        );
        self.audit(AuditRecord::new(AuditEventType::PasswordChanged, now).by(identity_id));
        tracing::info!(identity = %identity_id, "password changed");
        Ok(())
    }

    /// Swap the hash and push the previous one into history in one transaction.
    ///
    /// `checked_hash` is the hash the caller verified against; a password changed
    /// in the meantime fails with `InvalidCredentials`. `also` runs inside the
    /// same transaction and can veto the change.
    fn replace_password<F>(
        &self,
        identity_id: IdentityId,
        checked_hash: &str,
        new_secret: &str,
        now: DateTime<Utc>,
        also: F,
    ) -> ArchiveResult<Identity>
    where
        F: FnOnce() -> ArchiveResult<()>,
    {
        let new_hash = self.vault.hash(new_secret)?;
        let keep = self.config.password.history_depth;

        transaction(self.store.as_ref(), || {
            also()?;
            let (identity, previous_hash) = self.amend(identity_id, |fresh| {
                if fresh.password_hash != checked_hash {
                    return Err(ArchiveError::InvalidCredentials);
                }
                fresh.password_changed_at = now;
                Ok(std::mem::replace(&mut fresh.password_hash, new_hash))
            })?;
            self.store.push_password_history(
                PasswordHistoryEntry {
                    identity_id,
                    password_hash: previous_hash,
                    recorded_at: now,
                },
                keep,
            )?;
            Ok(identity)
        })
    }

    /// Always answers [`RESET_REQUEST_ACK`] for a well-formed address.
    pub fn request_password_reset(&self, email: &str) -> ArchiveResult<&'static str> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ArchiveError::validation("a valid email address is required"));
        }
        let now = self.clock.now();

        match self.store.find_by_email(email) {
            Ok(Some(identity)) if identity.status.can_authenticate() => {
                if let Err(err) = self.issue_reset_token(&identity, now) {
                    tracing::error!(error = %err, "failed to issue reset token");
                }
            }
            Ok(_) => {
                self.audit(
                    AuditRecord::new(AuditEventType::PasswordResetRequested, now)
                        .details(json!({ "matched": false })),
                );
            }
            Err(err) => tracing::error!(error = %err, "reset lookup failed"),
        }
        Ok(RESET_REQUEST_ACK)
    }

    fn issue_reset_token(&self, identity: &Identity, now: DateTime<Utc>) -> ArchiveResult<()> {
        self.prune_tokens(now);
        let token = generate_token();
        let expires_at = now + self.config.password.reset_token_ttl();
        self.store.insert_reset_token(ResetTokenRecord {
            id: Uuid::now_v7(),
            email: identity.email.clone(),
            token_hash: hash_token(&token),
            expires_at,
            used: false,
            created_at: now,
        })?;

        notify(
            self.notifier.as_ref(),
            identity.id,
            NotificationKind::PasswordResetRequested,
            json!({ "email": identity.email, "token": token, "expires_at": expires_at }),
        );
        self.audit(
            AuditRecord::new(AuditEventType::PasswordResetRequested, now)
                .by(identity.id)
                .details(json!({ "matched": true, "expires_at": expires_at })),
        );
        Ok(())
    }

    pub fn reset_password(&self, email: &str, token: &str, new_secret: &str) -> ArchiveResult<()> {
        let now = self.clock.now();
        let record = self
            .store
            .find_reset_token(email.trim(), &hash_token(token))?
            .filter(|record| !record.used && record.expires_at > now)
            .ok_or(ArchiveError::TokenExpiredOrInvalid)?;

        self.vault.check_strength(new_secret)?;
        let identity = self
            .store
            .find_by_email(&record.email)?
            .ok_or(ArchiveError::TokenExpiredOrInvalid)?;
        let history = self.store.password_history(identity.id)?;
        self.vault.ensure_not_reused(new_secret, &identity.password_hash, &history)?;

        // Consuming the token is the first write of the transaction; a concurrent
        // reset that already used it fails here and nothing else changes.
        let token_id = record.id;
        self.replace_password(identity.id, &identity.password_hash, new_secret, now, || {
            self.store.mark_reset_token_used(token_id)
        })
        .map_err(|err| match err {
            ArchiveError::InvalidCredentials => ArchiveError::TokenExpiredOrInvalid,
            other => other,
        })?;

        notify(
            self.notifier.as_ref(),
            identity.id,
            NotificationKind::PasswordChanged,
            json!({ "changed_at": now, "via": "reset" }),
        );
        self.audit(AuditRecord::new(AuditEventType::PasswordReset, now).by(identity.id));
        tracing::info!(identity = %identity.id, "password reset");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Administration
    // ─────────────────────────────────────────────────────────────────────────

    /// Provision an identity. `actor = None` is system provisioning (bootstrap, imports).
    pub fn create_identity(
        &self,
        actor: Option<&RequestContext>,
        new: NewIdentity,
    ) -> ArchiveResult<Identity> {
        let now = self.clock.now();
        if let Some(ctx) = actor {
            if let Err(err) = self.resolver.require(ctx.identity_id(), names::MANAGE_USERS, None) {
                return Err(self.deny(ctx, "create_identity", err));
            }
            if new.role == Role::SuperAdmin && ctx.role() != Role::SuperAdmin {
                return Err(self.deny(
                    ctx,
                    "create_identity",
                    ArchiveError::denied("only a super admin may create super admins"),
                ));
            }
        }

        let username = new.username.trim().to_string();
        let email = new.email.trim().to_string();
        let full_name = new.full_name.trim().to_string();
        if username.is_empty() || full_name.is_empty() {
            return Err(ArchiveError::validation("username and full name are required"));
        }
        if !email.contains('@') {
            return Err(ArchiveError::validation("a valid email address is required"));
        }
        self.vault.check_strength(&new.password)?;

        let identity = Identity {
            id: IdentityId::new(),
            username,
            email,
            employee_id: new
                .employee_id
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            full_name,
            password_hash: self.vault.hash(&new.password)?,
            password_changed_at: now,
            role: new.role,
            department_id: new.department_id,
            status: IdentityStatus::Active,
            failed_attempts: 0,
            locked_until: None,
            last_login: None,
            last_activity: None,
            created_at: now,
            created_by: actor.map(RequestContext::identity_id),
        };
        self.store.insert(&identity)?;

        self.audit(
            AuditRecord::new(AuditEventType::IdentityCreated, now)
                .by_opt(actor.map(RequestContext::identity_id))
                .details(json!({
                    "identity_id": identity.id,
                    "username": identity.username,
                    "role": identity.role,
                })),
        );
        tracing::info!(identity = %identity.id, role = %identity.role, "identity created");
        Ok(identity)
    }

    pub fn update_identity(
        &self,
        ctx: &RequestContext,
        target_id: IdentityId,
        update: IdentityUpdate,
    ) -> ArchiveResult<Identity> {
        if update.is_empty() {
            return Err(ArchiveError::validation("no changes"));
        }
        let target = self.store.get(target_id)?.ok_or(ArchiveError::RecordNotFound)?;

        if !self.resolver.can_edit(ctx.identity_id(), target_id)? {
            return Err(self.deny(ctx, "update_identity", ArchiveError::denied("cannot edit this identity")));
        }
        if update.role.is_some_and(|role| role != target.role) && ctx.role() != Role::SuperAdmin {
            return Err(self.deny(
                ctx,
                "update_identity",
                ArchiveError::denied("only a super admin may change roles"),
            ));
        }
        if update.status.is_some_and(|status| status != target.status)
            && !self.resolver.has_permission(ctx.identity_id(), names::MANAGE_USERS, None)?
        {
            return Err(self.deny(
                ctx,
                "update_identity",
                ArchiveError::denied("missing permission 'manage_users'"),
            ));
        }

        let (target, changes) = self.amend(target_id, |target| {
            let mut changes = serde_json::Map::new();
            if let Some(full_name) = update.full_name.map(|n| n.trim().to_string()) {
                if !full_name.is_empty() && full_name != target.full_name {
                    changes.insert("full_name".into(), json!({ "from": target.full_name, "to": full_name }));
                    target.full_name = full_name;
                }
            }
            if let Some(department_id) = update.department_id {
                if department_id != target.department_id {
                    changes.insert(
                        "department_id".into(),
                        json!({ "from": target.department_id, "to": department_id }),
                    );
                    target.department_id = department_id;
                }
            }
            if let Some(role) = update.role {
                if role != target.role {
                    changes.insert("role".into(), json!({ "from": target.role, "to": role }));
                    target.role = role;
                }
            }
            if let Some(status) = update.status {
                if status != target.status {
                    changes.insert("status".into(), json!({ "from": target.status, "to": status }));
                    target.status = status;
                }
            }
            if changes.is_empty() {
                return Err(ArchiveError::validation("no changes"));
            }
            Ok(changes)
        })?;
        if !target.status.can_authenticate() {
            match self.sessions.destroy_all_for(target.id) {
                Ok(closed) => tracing::info!(identity = %target.id, closed, "sessions closed"),
                Err(err) => tracing::error!(error = %err, "failed to close sessions"),
            }
        }

        self.audit(
            AuditRecord::new(AuditEventType::IdentityUpdated, self.clock.now())
                .by(ctx.identity_id())
                .details(json!({ "identity_id": target.id, "changes": changes }))
                .from_origin(ctx.fingerprint()),
        );
        Ok(target)
    }

    pub fn grant_permission(
        &self,
        ctx: &RequestContext,
        target_id: IdentityId,
        permission: Permission,
        resource: Option<ResourceRef>,
    ) -> ArchiveResult<()> {
        if let Err(err) = self.resolver.require(ctx.identity_id(), names::MANAGE_USERS, None) {
            return Err(self.deny(ctx, "grant_permission", err));
        }
        let now = self.clock.now();
        let details = json!({
            "identity_id": target_id,
            "permission": permission,
            "resource": resource.as_ref().map(ToString::to_string),
        });
        self.resolver
            .grant(target_id, permission, resource, Some(ctx.identity_id()), now)?;

        self.audit(
            AuditRecord::new(AuditEventType::PermissionGranted, now)
                .by(ctx.identity_id())
                .details(details)
                .from_origin(ctx.fingerprint()),
        );
        Ok(())
    }

    pub fn revoke_permission(
        &self,
        ctx: &RequestContext,
        target_id: IdentityId,
        permission: &Permission,
        resource: Option<&ResourceRef>,
    ) -> ArchiveResult<bool> {
        if let Err(err) = self.resolver.require(ctx.identity_id(), names::MANAGE_USERS, None) {
            return Err(self.deny(ctx, "revoke_permission", err));
        }
        let removed = self.resolver.revoke(target_id, permission, resource)?;
        if removed {
            self.audit(
                AuditRecord::new(AuditEventType::PermissionRevoked, self.clock.now())
                    .by(ctx.identity_id())
                    .details(json!({
                        "identity_id": target_id,
                        "permission": permission,
                        "resource": resource.map(ToString::to_string),
                    }))
                    .from_origin(ctx.fingerprint()),
            );
        }
        Ok(removed)
    }
}
