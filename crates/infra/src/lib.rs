//! Infrastructure adapters and orchestration.
//!
//! The document store, the file storage collaborator, eligibility rules and
//! the lifecycle engine that ties identity, permissions and documents together.

pub mod config;
pub mod eligibility;
pub mod lifecycle;
pub mod storage;
pub mod store;

#[cfg(test)]
mod testkit;

pub use config::{ArchiveConfig, ConfigError};
pub use lifecycle::{DocumentDetail, DocumentLifecycleEngine, NewDocument, Upload};
pub use storage::{InMemoryStorage, Storage, StorageError, StoredObject, UploadMeta, content_hash};
pub use store::{ArchiveStore, InMemoryArchiveStore};
