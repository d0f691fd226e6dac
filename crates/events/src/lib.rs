//! Domain events and the outbound collaborators that observe them.

pub mod audit;
pub mod event;
pub mod notify;

pub use audit::{AuditEventType, AuditLog, AuditRecord, InMemoryAuditLog, record_or_warn};
pub use event::Event;
pub use notify::{InMemoryNotifier, Notification, NotificationKind, Notifier, NotifyError, notify};
