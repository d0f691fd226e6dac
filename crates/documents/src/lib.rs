//! Document domain module.
//!
//! The Document Record aggregate and its approval state machine, document
//! numbering, versions, and the Access Predicate Engine. Deterministic logic
//! only; persistence and orchestration live in `archive-infra`.

pub mod access;
pub mod config;
pub mod filter;
pub mod numbering;
pub mod record;
pub mod version;

pub use access::{AccessScope, Clause, Predicate, SqlFragment, SqlParam, Viewer, access_conditions};
pub use config::DocumentConfig;
pub use filter::{DocumentFilter, Page, SearchPage, in_category, listing_order, paginate};
pub use numbering::{DocumentNumber, prefix_for};
pub use record::{
    AccessLevel, Approval, Confidentiality, CreateDocument, DocumentChanges, DocumentCommand,
    DocumentCreated, DocumentEvent, DocumentFields, DocumentRecord, DocumentStatus, FieldChange,
    Review, is_document_editable, normalize_tags,
};
pub use version::{DocumentRevision, DocumentVersion, next_version_number};
