//! File storage collaborator.
//!
//! The lifecycle engine hands bytes plus metadata to a [`Storage`] and keeps
//! only the returned path and digest. Where and how bytes live is up to the
//! implementation; [`InMemoryStorage`] is for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use archive_core::{ArchiveError, DocumentId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("upload rejected: {0}")]
    Rejected(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<StorageError> for ArchiveError {
    fn from(err: StorageError) -> Self {
        ArchiveError::storage(err.to_string())
    }
}

/// What the caller knows about an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMeta {
    pub document_id: DocumentId,
    pub file_name: String,
    pub mime_type: Option<String>,
}

/// Where an upload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    /// SHA-256, hex.
    pub content_hash: String,
    pub size: u64,
}

pub trait Storage: Send + Sync {
    fn put(&self, bytes: &[u8], meta: &UploadMeta) -> Result<StoredObject, StorageError>;
    fn delete(&self, path: &str) -> Result<(), StorageError>;
}

impl<T: Storage + ?Sized> Storage for Arc<T> {
    fn put(&self, bytes: &[u8], meta: &UploadMeta) -> Result<StoredObject, StorageError> {
        (**self).put(bytes, meta)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        (**self).delete(path)
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Keeps objects in a map. `fail_next_put` makes the next upload fail once.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_next_put: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_put(&self) {
        self.fail_next_put.store(true, Ordering::SeqCst);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.trim_matches(|c| c == '.' || c == '_').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

impl Storage for InMemoryStorage {
    fn put(&self, bytes: &[u8], meta: &UploadMeta) -> Result<StoredObject, StorageError> {
        if self.fail_next_put.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected failure".into()));
        }
        if bytes.is_empty() {
            return Err(StorageError::Rejected("empty upload".into()));
        }

        let path = format!(
            "documents/{}/{}-{}",
            meta.document_id,
            Uuid::now_v7().simple(),
            safe_file_name(&meta.file_name)
        );
        let stored = StoredObject {
            path: path.clone(),
            content_hash: content_hash(bytes),
            size: bytes.len() as u64,
        };

        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".into()))?;
        objects.insert(path, bytes.to_vec());
        Ok(stored)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".into()))?;
        objects
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> UploadMeta {
        UploadMeta {
            document_id: DocumentId::new(),
            file_name: name.to_string(),
            mime_type: Some("application/pdf".into()),
        }
    }

    #[test]
    fn put_hashes_and_sizes_content() {
        let storage = InMemoryStorage::new();
        let stored = storage.put(b"hello", &meta("scan.pdf")).unwrap();

        assert_eq!(
            stored.content_hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(stored.size, 5);
        assert!(stored.path.ends_with("-scan.pdf"));
        assert!(storage.contains(&stored.path));
    }

    #[test]
    fn hostile_file_names_are_flattened() {
        let storage = InMemoryStorage::new();
        let stored = storage.put(b"x", &meta("../../etc/passwd")).unwrap();
        assert!(!stored.path.contains("/../"));
        assert!(stored.path.ends_with("-.._.._etc_passwd"));

        let unnamed = storage.put(b"x", &meta("  ")).unwrap();
        assert!(unnamed.path.ends_with("-upload"));
    }

    #[test]
    fn injected_failure_applies_once() {
        let storage = InMemoryStorage::new();
        storage.fail_next_put();
        match storage.put(b"data", &meta("a.pdf")) {
            Err(StorageError::Unavailable(_)) => {}
            other => panic!("expected Unavailable, got {other:?}"),
        }
        assert!(storage.put(b"data", &meta("a.pdf")).is_ok());
    }

    #[test]
    fn delete_reports_missing_objects() {
        let storage = InMemoryStorage::new();
        let stored = storage.put(b"data", &meta("a.pdf")).unwrap();
        storage.delete(&stored.path).unwrap();
        assert!(storage.is_empty());
        assert_eq!(
            storage.delete(&stored.path),
            Err(StorageError::NotFound(stored.path.clone()))
        );
    }

    #[test]
    fn storage_errors_become_storage_failures() {
        let err: ArchiveError = StorageError::Unavailable("disk".into()).into();
        assert_eq!(err, ArchiveError::storage("backend unavailable: disk"));
    }
}
