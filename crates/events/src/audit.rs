//! Append-only audit trail.
//!
//! Exactly one record is written per authentication event, per permission denial
//! at a transition boundary, and per document lifecycle transition.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use archive_core::{ArchiveError, ArchiveResult, ClientFingerprint, DocumentId, IdentityId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    LoginSuccess,
    LoginFailed,
    LoginBlocked,
    PasswordChangeRequired,
    Logout,
    SessionInvalidated,
    PasswordChanged,
    PasswordResetRequested,
    PasswordReset,
    IdentityCreated,
    IdentityUpdated,
    PermissionGranted,
    PermissionRevoked,
    PermissionDenied,
    DocumentCreated,
    DocumentUpdated,
    DocumentSubmitted,
    DocumentReviewed,
    DocumentApproved,
    DocumentRejected,
    DocumentDeleted,
    DocumentPurged,
    DocumentRestored,
    DocumentVersionCreated,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::LoginSuccess => "login_success",
            AuditEventType::LoginFailed => "login_failed",
            AuditEventType::LoginBlocked => "login_blocked",
            AuditEventType::PasswordChangeRequired => "password_change_required",
            AuditEventType::Logout => "logout",
            AuditEventType::SessionInvalidated => "session_invalidated",
            AuditEventType::PasswordChanged => "password_changed",
            AuditEventType::PasswordResetRequested => "password_reset_requested",
            AuditEventType::PasswordReset => "password_reset",
            AuditEventType::IdentityCreated => "identity_created",
            AuditEventType::IdentityUpdated => "identity_updated",
            AuditEventType::PermissionGranted => "permission_granted",
            AuditEventType::PermissionRevoked => "permission_revoked",
            AuditEventType::PermissionDenied => "permission_denied",
            AuditEventType::DocumentCreated => "document_created",
            AuditEventType::DocumentUpdated => "document_updated",
            AuditEventType::DocumentSubmitted => "document_submitted",
            AuditEventType::DocumentReviewed => "document_reviewed",
            AuditEventType::DocumentApproved => "document_approved",
            AuditEventType::DocumentRejected => "document_rejected",
            AuditEventType::DocumentDeleted => "document_deleted",
            AuditEventType::DocumentPurged => "document_purged",
            AuditEventType::DocumentRestored => "document_restored",
            AuditEventType::DocumentVersionCreated => "document_version_created",
        }
    }
}

impl core::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub identity_id: Option<IdentityId>,
    pub event_type: AuditEventType,
    pub details: JsonValue,
    pub related_record: Option<DocumentId>,
    pub origin: Option<ClientFingerprint>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(event_type: AuditEventType, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            identity_id: None,
            event_type,
            details: JsonValue::Null,
            related_record: None,
            origin: None,
            recorded_at,
        }
    }

    pub fn by(mut self, identity_id: IdentityId) -> Self {
        self.identity_id = Some(identity_id);
        self
    }

    pub fn by_opt(mut self, identity_id: Option<IdentityId>) -> Self {
        self.identity_id = identity_id;
        self
    }

    pub fn details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }

    pub fn about(mut self, document_id: DocumentId) -> Self {
        self.related_record = Some(document_id);
        self
    }

    pub fn from_origin(mut self, origin: &ClientFingerprint) -> Self {
        self.origin = Some(origin.clone());
        self
    }
}

/// Append-only audit sink.
pub trait AuditLog: Send + Sync {
    fn record(&self, entry: AuditRecord) -> ArchiveResult<()>;
}

impl<A: AuditLog + ?Sized> AuditLog for Arc<A> {
    fn record(&self, entry: AuditRecord) -> ArchiveResult<()> {
        (**self).record(entry)
    }
}

/// Record an entry, logging (not propagating) a sink failure.
///
/// Used on authentication paths where a broken audit sink must not lock users out.
pub fn record_or_warn(log: &dyn AuditLog, entry: AuditRecord) {
    let event_type = entry.event_type;
    if let Err(err) = log.record(entry) {
        tracing::error!(%event_type, error = %err, "failed to write audit record");
    }
}

/// In-memory audit log for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditRecord> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn of_type(&self, event_type: AuditEventType) -> Vec<AuditRecord> {
        self.entries()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

impl AuditLog for InMemoryAuditLog {
    fn record(&self, entry: AuditRecord) -> ArchiveResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ArchiveError::storage("audit log lock poisoned"))?;
        entries.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_are_appended_in_order() {
        let log = InMemoryAuditLog::new();
        let at = Utc::now();
        let actor = IdentityId::new();

        log.record(AuditRecord::new(AuditEventType::LoginFailed, at)).unwrap();
        log.record(
            AuditRecord::new(AuditEventType::LoginSuccess, at)
                .by(actor)
                .details(json!({ "remember": false })),
        )
        .unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, AuditEventType::LoginFailed);
        assert_eq!(entries[1].identity_id, Some(actor));
        assert_eq!(log.of_type(AuditEventType::LoginSuccess).len(), 1);
    }

    #[test]
    fn event_type_serializes_as_snake_case() {
        let value = serde_json::to_value(AuditEventType::DocumentVersionCreated).unwrap();
        assert_eq!(value, json!("document_version_created"));
        assert_eq!(
            AuditEventType::DocumentVersionCreated.as_str(),
            "document_version_created"
        );
    }
}
