//! Server-side sessions bound to a client fingerprint.
//!
//! Every stored session carries an HMAC-SHA256 seal over all of its fields,
//! `last_activity` included; `touch` re-seals. A record whose seal no longer
//! matches is destroyed on load and reported as [`ArchiveError::SessionInvalid`].

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use archive_core::{ArchiveError, ArchiveResult, ClientFingerprint, IdentityId};

use crate::tokens::generate_token;

type HmacSha256 = Hmac<Sha256>;

/// Opaque session identifier (256 random bits, hex).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(generate_token())
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "SessionId({prefix}…)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub identity_id: IdentityId,
    pub fingerprint: ClientFingerprint,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn start(identity_id: IdentityId, fingerprint: ClientFingerprint, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::generate(),
            identity_id,
            fingerprint,
            created_at: now,
            last_activity: now,
        }
    }
}

/// Session persistence keyed by opaque id.
pub trait SessionStore: Send + Sync {
    fn save(&self, session: Session) -> ArchiveResult<()>;
    /// `Err(SessionInvalid)` when the stored record was tampered with.
    fn load(&self, id: &SessionId) -> ArchiveResult<Option<Session>>;
    fn touch(&self, id: &SessionId, at: DateTime<Utc>) -> ArchiveResult<()>;
    fn destroy(&self, id: &SessionId) -> ArchiveResult<bool>;
    fn destroy_all_for(&self, identity_id: IdentityId) -> ArchiveResult<usize>;
    /// Drop every session idle since before `cutoff`.
    fn purge_idle(&self, cutoff: DateTime<Utc>) -> ArchiveResult<usize>;
}

/// Computes and checks session seals.
pub struct SessionSealer {
    key: Vec<u8>,
}

impl SessionSealer {
    /// An empty secret yields a random per-process key.
    pub fn new(secret: &str) -> Self {
        let key = if secret.is_empty() {
            generate_token().into_bytes()
        } else {
            secret.as_bytes().to_vec()
        };
        Self { key }
    }

    fn mac(&self, session: &Session) -> ArchiveResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| ArchiveError::internal(format!("invalid seal key: {e}")))?;
        mac.update(session.id.as_str().as_bytes());
        mac.update(b"\x1f");
        mac.update(session.identity_id.as_uuid().as_bytes());
        mac.update(b"\x1f");
        mac.update(session.fingerprint.address.as_bytes());
        mac.update(b"\x1f");
        mac.update(session.fingerprint.user_agent.as_bytes());
        mac.update(b"\x1f");
        mac.update(session.created_at.to_rfc3339().as_bytes());
        mac.update(b"\x1f");
        mac.update(session.last_activity.to_rfc3339().as_bytes());
        Ok(mac)
    }

    pub fn seal(&self, session: &Session) -> ArchiveResult<String> {
        Ok(hex::encode(self.mac(session)?.finalize().into_bytes()))
    }

    /// Constant-time seal comparison.
    pub fn verify(&self, session: &Session, seal: &str) -> bool {
        let Ok(expected) = hex::decode(seal) else {
            return false;
        };
        match self.mac(session) {
            Ok(mac) => mac.verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }
}

impl core::fmt::Debug for SessionSealer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SessionSealer")
    }
}

#[derive(Debug, Clone)]
struct StoredSession {
    session: Session,
    seal: String,
}

/// In-memory session store for tests/dev.
#[derive(Debug)]
pub struct InMemorySessionStore {
    sealer: SessionSealer,
    sessions: RwLock<HashMap<SessionId, StoredSession>>,
}

impl InMemorySessionStore {
    pub fn new(sealer: SessionSealer) -> Self {
        Self {
            sealer,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<E>(_: E) -> ArchiveError {
    ArchiveError::storage("session store lock poisoned")
}

impl SessionStore for InMemorySessionStore {
    fn save(&self, session: Session) -> ArchiveResult<()> {
        let seal = self.sealer.seal(&session)?;
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.insert(session.id.clone(), StoredSession { session, seal });
        Ok(())
    }

    fn load(&self, id: &SessionId) -> ArchiveResult<Option<Session>> {
        let stored = {
            let sessions = self.sessions.read().map_err(poisoned)?;
            match sessions.get(id) {
                Some(stored) => stored.clone(),
                None => return Ok(None),
            }
        };

        if stored.session.id != *id || !self.sealer.verify(&stored.session, &stored.seal) {
            tracing::warn!(session = ?id, "session seal mismatch; destroying");
            self.destroy(id)?;
            return Err(ArchiveError::SessionInvalid);
        }
        Ok(Some(stored.session))
    }

    /// Only a record whose current seal verifies is re-sealed; a forged one is left to fail on load.
    fn touch(&self, id: &SessionId, at: DateTime<Utc>) -> ArchiveResult<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        if let Some(stored) = sessions.get_mut(id) {
            if self.sealer.verify(&stored.session, &stored.seal) {
                stored.session.last_activity = at;
                stored.seal = self.sealer.seal(&stored.session)?;
            }
        }
        Ok(())
    }

    fn destroy(&self, id: &SessionId) -> ArchiveResult<bool> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        Ok(sessions.remove(id).is_some())
    }

    fn destroy_all_for(&self, identity_id: IdentityId) -> ArchiveResult<usize> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let before = sessions.len();
        sessions.retain(|_, stored| stored.session.identity_id != identity_id);
        Ok(before - sessions.len())
    }

    fn purge_idle(&self, cutoff: DateTime<Utc>) -> ArchiveResult<usize> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let before = sessions.len();
        sessions.retain(|_, stored| stored.session.last_activity >= cutoff);
        Ok(before - sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint() -> ClientFingerprint {
        ClientFingerprint::new("10.0.0.5", "Mozilla/5.0")
    }

    fn store() -> InMemorySessionStore {
        InMemorySessionStore::new(SessionSealer::new("test-secret"))
    }

    #[test]
    fn saved_session_loads_back() {
        let store = store();
        let session = Session::start(IdentityId::new(), fingerprint(), Utc::now());
        store.save(session.clone()).unwrap();
        assert_eq!(store.load(&session.id).unwrap(), Some(session));
    }

    #[test]
    fn touch_does_not_break_the_seal() {
        let store = store();
        let session = Session::start(IdentityId::new(), fingerprint(), Utc::now());
        store.save(session.clone()).unwrap();
        let later = session.created_at + chrono::Duration::minutes(5);
        store.touch(&session.id, later).unwrap();

        let loaded = store.load(&session.id).unwrap().unwrap();
        assert_eq!(loaded.last_activity, later);
    }

    #[test]
    fn tampered_owner_is_detected_and_destroyed() {
        let store = store();
        let session = Session::start(IdentityId::new(), fingerprint(), Utc::now());
        store.save(session.clone()).unwrap();

        {
            let mut sessions = store.sessions.write().unwrap();
            let stored = sessions.get_mut(&session.id).unwrap();
            stored.session.identity_id = IdentityId::new();
        }

        assert_eq!(store.load(&session.id).unwrap_err(), ArchiveError::SessionInvalid);
        assert_eq!(store.load(&session.id).unwrap(), None);
    }

    #[test]
    fn forged_activity_is_detected_and_destroyed() {
        let store = store();
        let session = Session::start(IdentityId::new(), fingerprint(), Utc::now());
        store.save(session.clone()).unwrap();

        {
            let mut sessions = store.sessions.write().unwrap();
            let stored = sessions.get_mut(&session.id).unwrap();
            stored.session.last_activity = session.created_at + chrono::Duration::hours(8);
        }
        // Touching a forged record must not launder it.
        store.touch(&session.id, session.created_at + chrono::Duration::hours(9)).unwrap();

        assert_eq!(store.load(&session.id).unwrap_err(), ArchiveError::SessionInvalid);
        assert!(store.is_empty());
    }

    #[test]
    fn purge_idle_keeps_recent_sessions() {
        let store = store();
        let start = Utc::now();
        let stale = Session::start(IdentityId::new(), fingerprint(), start);
        let fresh = Session::start(IdentityId::new(), fingerprint(), start);
        store.save(stale.clone()).unwrap();
        store.save(fresh.clone()).unwrap();
        store.touch(&fresh.id, start + chrono::Duration::minutes(90)).unwrap();

        assert_eq!(store.purge_idle(start + chrono::Duration::minutes(60)).unwrap(), 1);
        assert_eq!(store.load(&stale.id).unwrap(), None);
        assert!(store.load(&fresh.id).unwrap().is_some());
    }

    #[test]
    fn seals_depend_on_the_secret() {
        let session = Session::start(IdentityId::new(), fingerprint(), Utc::now());
        let seal = SessionSealer::new("one").seal(&session).unwrap();
        assert!(SessionSealer::new("one").verify(&session, &seal));
        assert!(!SessionSealer::new("two").verify(&session, &seal));
        assert!(!SessionSealer::new("one").verify(&session, "zz"));
    }

    #[test]
    fn destroy_all_for_only_hits_the_owner() {
        let store = store();
        let owner = IdentityId::new();
        store.save(Session::start(owner, fingerprint(), Utc::now())).unwrap();
        store.save(Session::start(owner, fingerprint(), Utc::now())).unwrap();
        store.save(Session::start(IdentityId::new(), fingerprint(), Utc::now())).unwrap();

        assert_eq!(store.destroy_all_for(owner).unwrap(), 2);
        assert_eq!(store.len(), 1);
    }
}
