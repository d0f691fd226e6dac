//! Outbound notifications (fire-and-forget).

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use archive_core::IdentityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AccountLocked,
    PasswordChanged,
    PasswordResetRequested,
    /// Sent to each eligible approver when a document enters `pending_approval`.
    ApprovalRequested,
    DocumentReviewed,
    DocumentApproved,
    DocumentRejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: IdentityId,
    pub kind: NotificationKind,
    pub payload: JsonValue,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Delivery collaborator (email, in-app, ...). Delivery itself is out of scope here.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        (**self).send(notification)
    }
}

/// Send without blocking the caller on failure.
pub fn notify(notifier: &dyn Notifier, recipient: IdentityId, kind: NotificationKind, payload: JsonValue) {
    let notification = Notification {
        recipient,
        kind,
        payload,
    };
    if let Err(err) = notifier.send(notification) {
        tracing::warn!(%recipient, ?kind, error = %err, "notification dropped");
    }
}

/// Records notifications instead of delivering them.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, recipient: IdentityId, kind: NotificationKind) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.recipient == recipient && n.kind == kind)
            .collect()
    }
}

impl Notifier for InMemoryNotifier {
    fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotifyError::Delivery("notifier lock poisoned".into()))?;
        sent.push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Unreachable;

    impl Notifier for Unreachable {
        fn send(&self, _notification: Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("smtp timeout".into()))
        }
    }

    #[test]
    fn failed_delivery_does_not_propagate() {
        // Nothing to assert beyond "returns": failures are logged only.
        notify(&Unreachable, IdentityId::new(), NotificationKind::AccountLocked, json!({}));
    }

    #[test]
    fn in_memory_notifier_keeps_sent_messages() {
        let notifier = InMemoryNotifier::new();
        let recipient = IdentityId::new();
        notify(
            &notifier,
            recipient,
            NotificationKind::PasswordChanged,
            json!({ "at": "now" }),
        );

        let sent = notifier.sent_to(recipient, NotificationKind::PasswordChanged);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload["at"], "now");
    }
}
