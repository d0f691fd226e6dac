//! `archive-core` - foundation building blocks for the document archive.
//!
//! Ids, the shared error taxonomy, the aggregate contract, time and transactions.
//! No storage or transport concerns live here.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod fingerprint;
pub mod id;
pub mod transaction;

pub use aggregate::{Aggregate, AggregateRoot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ArchiveError, ArchiveResult};
pub use fingerprint::ClientFingerprint;
pub use id::{CategoryId, DepartmentId, DocumentId, IdentityId};
pub use transaction::{Transactional, TxCell, transaction};
