//! Fully wired in-memory archive for tests.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use archive_auth::{
    AuthConfig, AuthOutcome, HashingSettings, IdentityManager, InMemoryIdentityStore,
    InMemorySessionStore, LoginRequest, NewIdentity, RequestContext, Role, SessionSealer,
};
use archive_core::{ClientFingerprint, DepartmentId, ManualClock};
use archive_documents::{DocumentConfig, DocumentFields, DocumentRecord};
use archive_events::{AuditEventType, AuditRecord, InMemoryNotifier};

use crate::lifecycle::{DocumentLifecycleEngine, NewDocument};
use crate::storage::InMemoryStorage;
use crate::store::InMemoryArchiveStore;

pub const SECRET: &str = "Archive2024";

pub type Engine = DocumentLifecycleEngine<InMemoryIdentityStore, InMemoryArchiveStore, InMemoryStorage>;

pub struct Archive {
    pub manager: IdentityManager<InMemoryIdentityStore, InMemorySessionStore>,
    pub engine: Engine,
    pub store: Arc<InMemoryArchiveStore>,
    pub storage: Arc<InMemoryStorage>,
    pub notifier: Arc<InMemoryNotifier>,
    pub clock: Arc<ManualClock>,
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()
}

pub fn finance() -> DepartmentId {
    DepartmentId::from_uuid(Uuid::from_u128(10))
}

pub fn operations() -> DepartmentId {
    DepartmentId::from_uuid(Uuid::from_u128(20))
}

pub fn desk() -> ClientFingerprint {
    ClientFingerprint::new("192.168.1.20", "ArchiveDesk/2.1")
}

pub fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).unwrap()
}

pub fn archive() -> Archive {
    archive_with(DocumentConfig::default())
}

pub fn archive_with(documents: DocumentConfig) -> Archive {
    let auth = AuthConfig {
        hashing: HashingSettings::minimal(),
        ..AuthConfig::default()
    };
    let identities = Arc::new(InMemoryIdentityStore::new());
    let sessions = Arc::new(InMemorySessionStore::new(SessionSealer::new("archive-tests")));
    let store = Arc::new(InMemoryArchiveStore::new());
    let storage = Arc::new(InMemoryStorage::new());
    let notifier = Arc::new(InMemoryNotifier::new());
    let clock = Arc::new(ManualClock::new(start()));

    let manager = IdentityManager::new(
        identities,
        sessions,
        auth,
        store.clone(),
        notifier.clone(),
        clock.clone(),
    )
    .unwrap();
    let engine = DocumentLifecycleEngine::new(
        manager.resolver().clone(),
        store.clone(),
        storage.clone(),
        documents,
        store.clone(),
        notifier.clone(),
        clock.clone(),
    );

    Archive { manager, engine, store, storage, notifier, clock }
}

impl Archive {
    /// Provision an identity and return a validated request context for it.
    pub fn enroll(&self, username: &str, role: Role, department: Option<DepartmentId>) -> RequestContext {
        self.manager
            .create_identity(
                None,
                NewIdentity {
                    username: username.to_string(),
                    email: format!("{username}@archive.test"),
                    employee_id: None,
                    full_name: username.to_uppercase(),
                    password: SECRET.to_string(),
                    role,
                    department_id: department,
                },
            )
            .unwrap();
        self.sign_in(username)
    }

    pub fn sign_in(&self, username: &str) -> RequestContext {
        let outcome = self
            .manager
            .authenticate(LoginRequest::new(username, SECRET, desk()))
            .unwrap();
        let AuthOutcome::Authenticated(session) = outcome else {
            panic!("expected a session for {username}");
        };
        self.manager.validate_session(&session.session_id, &desk()).unwrap()
    }

    pub fn invoice(&self, ctx: &RequestContext, title: &str, day: u32) -> DocumentRecord {
        self.engine.create(ctx, invoice(title, day)).unwrap()
    }

    pub fn trail(&self, event_type: AuditEventType) -> Vec<AuditRecord> {
        self.store
            .audit_trail()
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

pub fn invoice(title: &str, day: u32) -> NewDocument {
    let mut fields = DocumentFields::new(title, date(5, day));
    fields.amount = Some(50_000);
    NewDocument::new("invoice", fields)
}
