//! Document persistence.
//!
//! Every read goes through an [`AccessScope`]: there is no method that hands
//! out document rows without one. Versions, revisions, the activity trail and
//! number high-water marks live next to the rows so a lifecycle transition can
//! change all of them in one transaction.

use std::collections::HashMap;
use std::sync::Arc;

use archive_core::{ArchiveError, ArchiveResult, DocumentId, Transactional, TxCell};
use archive_documents::{
    AccessScope, DocumentNumber, DocumentRecord, DocumentRevision, DocumentVersion, Predicate,
};
use archive_events::{AuditLog, AuditRecord};

pub trait ArchiveStore: Transactional + Send + Sync {
    /// Fails with `Validation` when the id or number is already taken.
    fn insert_document(&self, record: &DocumentRecord) -> ArchiveResult<()>;
    /// Fails with `RecordNotFound` for unknown ids.
    fn save_document(&self, record: &DocumentRecord) -> ArchiveResult<()>;
    fn find_document(&self, id: DocumentId, scope: &AccessScope) -> ArchiveResult<Option<DocumentRecord>>;
    /// Rows matching `scope` AND `criteria`, unordered.
    fn query_documents(&self, scope: &AccessScope, criteria: &Predicate) -> ArchiveResult<Vec<DocumentRecord>>;
    /// Remove the row with its versions and revisions. Returns the removed versions.
    fn purge_document(&self, id: DocumentId) -> ArchiveResult<Vec<DocumentVersion>>;

    /// Allocate the next number of the `(prefix, year)` series and raise its high-water mark.
    fn next_number(&self, prefix: &str, year: i32) -> ArchiveResult<DocumentNumber>;
    fn number_high_water(&self, prefix: &str, year: i32) -> ArchiveResult<u32>;

    /// Ascending by version number.
    fn versions(&self, id: DocumentId) -> ArchiveResult<Vec<DocumentVersion>>;
    /// Fails with `Validation` when the version number already exists.
    fn insert_version(&self, version: &DocumentVersion) -> ArchiveResult<()>;

    /// Oldest first.
    fn revisions(&self, id: DocumentId) -> ArchiveResult<Vec<DocumentRevision>>;
    fn insert_revision(&self, revision: &DocumentRevision) -> ArchiveResult<()>;

    fn record_activity(&self, entry: AuditRecord) -> ArchiveResult<()>;
    /// Activity about one document, oldest first.
    fn activity(&self, id: DocumentId) -> ArchiveResult<Vec<AuditRecord>>;
}

impl<S: ArchiveStore + ?Sized> ArchiveStore for Arc<S> {
    fn insert_document(&self, record: &DocumentRecord) -> ArchiveResult<()> {
        (**self).insert_document(record)
    }

    fn save_document(&self, record: &DocumentRecord) -> ArchiveResult<()> {
        (**self).save_document(record)
    }

    fn find_document(&self, id: DocumentId, scope: &AccessScope) -> ArchiveResult<Option<DocumentRecord>> {
        (**self).find_document(id, scope)
    }

    fn query_documents(&self, scope: &AccessScope, criteria: &Predicate) -> ArchiveResult<Vec<DocumentRecord>> {
        (**self).query_documents(scope, criteria)
    }

    fn purge_document(&self, id: DocumentId) -> ArchiveResult<Vec<DocumentVersion>> {
        (**self).purge_document(id)
    }

    fn next_number(&self, prefix: &str, year: i32) -> ArchiveResult<DocumentNumber> {
        (**self).next_number(prefix, year)
    }

    fn number_high_water(&self, prefix: &str, year: i32) -> ArchiveResult<u32> {
        (**self).number_high_water(prefix, year)
    }

    fn versions(&self, id: DocumentId) -> ArchiveResult<Vec<DocumentVersion>> {
        (**self).versions(id)
    }

    fn insert_version(&self, version: &DocumentVersion) -> ArchiveResult<()> {
        (**self).insert_version(version)
    }

    fn revisions(&self, id: DocumentId) -> ArchiveResult<Vec<DocumentRevision>> {
        (**self).revisions(id)
    }

    fn insert_revision(&self, revision: &DocumentRevision) -> ArchiveResult<()> {
        (**self).insert_revision(revision)
    }

    fn record_activity(&self, entry: AuditRecord) -> ArchiveResult<()> {
        (**self).record_activity(entry)
    }

    fn activity(&self, id: DocumentId) -> ArchiveResult<Vec<AuditRecord>> {
        (**self).activity(id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory implementation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct ArchiveTables {
    documents: HashMap<DocumentId, DocumentRecord>,
    high_water: HashMap<(String, i32), u32>,
    versions: Vec<DocumentVersion>,
    revisions: Vec<DocumentRevision>,
    activity: Vec<AuditRecord>,
}

impl ArchiveTables {
    fn numbers(&self) -> Vec<DocumentNumber> {
        self.documents
            .values()
            .filter_map(|doc| doc.number().parse().ok())
            .collect()
    }
}

/// Transactional in-memory archive. Also usable as the process audit log, so
/// denials and transitions end up in one trail.
#[derive(Debug)]
pub struct InMemoryArchiveStore {
    tables: TxCell<ArchiveTables>,
}

impl InMemoryArchiveStore {
    pub fn new() -> Self {
        Self {
            tables: TxCell::new(ArchiveTables::default()),
        }
    }

    /// The whole trail, oldest first.
    pub fn audit_trail(&self) -> ArchiveResult<Vec<AuditRecord>> {
        self.tables.read(|t| t.activity.clone())
    }
}

impl Default for InMemoryArchiveStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Transactional for InMemoryArchiveStore {
    fn begin(&self) -> ArchiveResult<()> {
        self.tables.begin()
    }

    fn commit(&self) -> ArchiveResult<()> {
        self.tables.commit()
    }

    fn rollback(&self) -> ArchiveResult<()> {
        self.tables.rollback()
    }
}

impl ArchiveStore for InMemoryArchiveStore {
    fn insert_document(&self, record: &DocumentRecord) -> ArchiveResult<()> {
        self.tables.write(|t| {
            if t.documents.contains_key(&record.document_id()) {
                return Err(ArchiveError::validation("document id already exists"));
            }
            if t.documents.values().any(|doc| doc.number() == record.number()) {
                return Err(ArchiveError::validation(format!(
                    "document number {} already exists",
                    record.number()
                )));
            }
            t.documents.insert(record.document_id(), record.clone());
            Ok(())
        })
    }

    fn save_document(&self, record: &DocumentRecord) -> ArchiveResult<()> {
        self.tables.write(|t| match t.documents.get_mut(&record.document_id()) {
            Some(row) => {
                *row = record.clone();
                Ok(())
            }
            None => Err(ArchiveError::not_found()),
        })
    }

    fn find_document(&self, id: DocumentId, scope: &AccessScope) -> ArchiveResult<Option<DocumentRecord>> {
        self.tables.read(|t| {
            t.documents
                .get(&id)
                .filter(|doc| scope.permits(doc))
                .cloned()
        })
    }

    fn query_documents(&self, scope: &AccessScope, criteria: &Predicate) -> ArchiveResult<Vec<DocumentRecord>> {
        let predicate = scope.narrowed(criteria.clone());
        self.tables.read(|t| {
            t.documents
                .values()
                .filter(|doc| predicate.matches(doc))
                .cloned()
                .collect()
        })
    }

    fn purge_document(&self, id: DocumentId) -> ArchiveResult<Vec<DocumentVersion>> {
        self.tables.write(|t| {
            if t.documents.remove(&id).is_none() {
                return Err(ArchiveError::not_found());
            }
            let (removed, kept): (Vec<_>, Vec<_>) =
                t.versions.drain(..).partition(|v| v.document_id == id);
            t.versions = kept;
            t.revisions.retain(|r| r.document_id != id);
            Ok(removed)
        })
    }

    fn next_number(&self, prefix: &str, year: i32) -> ArchiveResult<DocumentNumber> {
        self.tables.write(|t| {
            let key = (prefix.to_string(), year);
            let high_water = t.high_water.get(&key).copied().unwrap_or(0);
            let existing = t.numbers();
            let number = DocumentNumber::next(prefix, year, &existing, high_water);
            t.high_water.insert(key, number.sequence());
            Ok(number)
        })
    }

    fn number_high_water(&self, prefix: &str, year: i32) -> ArchiveResult<u32> {
        self.tables.read(|t| {
            t.high_water
                .get(&(prefix.to_string(), year))
                .copied()
                .unwrap_or(0)
        })
    }

    fn versions(&self, id: DocumentId) -> ArchiveResult<Vec<DocumentVersion>> {
        self.tables.read(|t| {
            let mut versions: Vec<DocumentVersion> = t
                .versions
                .iter()
                .filter(|v| v.document_id == id)
                .cloned()
                .collect();
            versions.sort_by_key(|v| v.version);
            versions
        })
    }

    fn insert_version(&self, version: &DocumentVersion) -> ArchiveResult<()> {
        self.tables.write(|t| {
            let taken = t
                .versions
                .iter()
                .any(|v| v.document_id == version.document_id && v.version == version.version);
            if taken {
                return Err(ArchiveError::validation(format!(
                    "version {} already exists",
                    version.version
                )));
            }
            t.versions.push(version.clone());
            Ok(())
        })
    }

    fn revisions(&self, id: DocumentId) -> ArchiveResult<Vec<DocumentRevision>> {
        self.tables.read(|t| {
            t.revisions
                .iter()
                .filter(|r| r.document_id == id)
                .cloned()
                .collect()
        })
    }

    fn insert_revision(&self, revision: &DocumentRevision) -> ArchiveResult<()> {
        self.tables.write(|t| {
            t.revisions.push(revision.clone());
            Ok(())
        })
    }

    fn record_activity(&self, entry: AuditRecord) -> ArchiveResult<()> {
        self.tables.write(|t| {
            t.activity.push(entry);
            Ok(())
        })
    }

    fn activity(&self, id: DocumentId) -> ArchiveResult<Vec<AuditRecord>> {
        self.tables.read(|t| {
            t.activity
                .iter()
                .filter(|e| e.related_record == Some(id))
                .cloned()
                .collect()
        })
    }
}

impl AuditLog for InMemoryArchiveStore {
    fn record(&self, entry: AuditRecord) -> ArchiveResult<()> {
        self.record_activity(entry)
    }
}
