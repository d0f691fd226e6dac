//! File versions and edit revisions attached to a document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use archive_core::{DocumentId, IdentityId};

use crate::record::FieldChange;

/// An uploaded file generation. Numbers are append-only per document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub document_id: DocumentId,
    pub version: u32,
    pub storage_path: String,
    /// SHA-256, hex.
    pub content_hash: String,
    pub size: u64,
    pub change_note: Option<String>,
    pub created_by: IdentityId,
    pub created_at: DateTime<Utc>,
}

/// Field-level history written by every successful edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRevision {
    pub document_id: DocumentId,
    pub actor: IdentityId,
    pub changes: Vec<FieldChange>,
    pub recorded_at: DateTime<Utc>,
}

pub fn next_version_number(existing: &[DocumentVersion]) -> u32 {
    existing
        .iter()
        .map(|v| v.version)
        .max()
        .unwrap_or(0)
        .saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(n: u32) -> DocumentVersion {
        DocumentVersion {
            document_id: DocumentId::new(),
            version: n,
            storage_path: format!("docs/{n}"),
            content_hash: String::new(),
            size: 0,
            change_note: None,
            created_by: IdentityId::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn first_version_is_one() {
        assert_eq!(next_version_number(&[]), 1);
    }

    #[test]
    fn gaps_are_never_refilled() {
        assert_eq!(next_version_number(&[version(1), version(4), version(2)]), 5);
    }
}
