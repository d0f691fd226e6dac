use chrono::{DateTime, Utc};

use archive_core::{ClientFingerprint, DepartmentId, IdentityId};

use crate::identity::Identity;
use crate::roles::Role;
use crate::session::SessionId;

/// Per-request view of who is calling.
///
/// Only [`crate::IdentityManager`] builds one, after a session validated. It is
/// threaded explicitly through every document operation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    session_id: SessionId,
    identity: Identity,
    fingerprint: ClientFingerprint,
    resolved_at: DateTime<Utc>,
}

impl RequestContext {
    pub(crate) fn new(
        session_id: SessionId,
        identity: Identity,
        fingerprint: ClientFingerprint,
        resolved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            identity,
            fingerprint,
            resolved_at,
        }
    }

    pub fn identity_id(&self) -> IdentityId {
        self.identity.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn role(&self) -> Role {
        self.identity.role
    }

    pub fn department_id(&self) -> Option<DepartmentId> {
        self.identity.department_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn fingerprint(&self) -> &ClientFingerprint {
        &self.fingerprint
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }
}
