//! Document Record aggregate.
//!
//! ```text
//! draft ──submit──► pending_approval ──approve──► approved
//!   ▲                      │
//!   │                      └──reject───► rejected
//!   │
//!   └──restore── deleted ◄──delete── (any non-deleted state)
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use archive_core::{Aggregate, AggregateRoot, ArchiveError, CategoryId, DepartmentId, DocumentId, IdentityId};
use archive_events::{AuditEventType, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Deleted,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 5] = [
        DocumentStatus::Draft,
        DocumentStatus::PendingApproval,
        DocumentStatus::Approved,
        DocumentStatus::Rejected,
        DocumentStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::PendingApproval => "pending_approval",
            DocumentStatus::Approved => "approved",
            DocumentStatus::Rejected => "rejected",
            DocumentStatus::Deleted => "deleted",
        }
    }
}

impl core::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Only drafts and documents awaiting approval accept metadata edits.
pub fn is_document_editable(status: DocumentStatus) -> bool {
    matches!(status, DocumentStatus::Draft | DocumentStatus::PendingApproval)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidentiality {
    Public,
    #[default]
    Internal,
    Confidential,
}

impl Confidentiality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidentiality::Public => "public",
            Confidentiality::Internal => "internal",
            Confidentiality::Confidential => "confidential",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Private,
    #[default]
    Department,
    Organization,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Private => "private",
            AccessLevel::Department => "department",
            AccessLevel::Organization => "organization",
        }
    }
}

/// Editable metadata of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFields {
    pub title: String,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub document_date: NaiveDate,
    /// Smallest currency unit.
    pub amount: Option<i64>,
    pub currency: String,
    pub confidentiality: Confidentiality,
    pub access_level: AccessLevel,
    pub allowed_users: BTreeSet<IdentityId>,
    pub notes: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// Narrower filing slot inside `category_id`.
    #[serde(default)]
    pub subcategory_id: Option<CategoryId>,
}

impl DocumentFields {
    pub fn new(title: impl Into<String>, document_date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            description: None,
            keywords: None,
            document_date,
            amount: None,
            currency: "SAR".to_string(),
            confidentiality: Confidentiality::default(),
            access_level: AccessLevel::default(),
            allowed_users: BTreeSet::new(),
            notes: None,
            expiry_date: None,
            category_id: None,
            subcategory_id: None,
        }
    }

    fn validate(&self) -> Result<(), ArchiveError> {
        if self.title.trim().is_empty() {
            return Err(ArchiveError::validation("title is required"));
        }
        if self.amount.is_some_and(|amount| amount < 0) {
            return Err(ArchiveError::validation("amount must not be negative"));
        }
        if self.currency.trim().is_empty() {
            return Err(ArchiveError::validation("currency is required"));
        }
        if self.expiry_date.is_some_and(|expiry| expiry < self.document_date) {
            return Err(ArchiveError::validation("expiry date precedes document date"));
        }
        if self.subcategory_id.is_some() && self.category_id.is_none() {
            return Err(ArchiveError::validation("a subcategory needs a category"));
        }
        if self.subcategory_id.is_some() && self.subcategory_id == self.category_id {
            return Err(ArchiveError::validation("subcategory repeats the category"));
        }
        Ok(())
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub keywords: Option<Option<String>>,
    pub document_date: Option<NaiveDate>,
    pub amount: Option<Option<i64>>,
    pub currency: Option<String>,
    pub confidentiality: Option<Confidentiality>,
    pub access_level: Option<AccessLevel>,
    pub allowed_users: Option<BTreeSet<IdentityId>>,
    pub tags: Option<BTreeSet<String>>,
    pub notes: Option<Option<String>>,
    pub expiry_date: Option<Option<NaiveDate>>,
    pub category_id: Option<Option<CategoryId>>,
    pub subcategory_id: Option<Option<CategoryId>>,
}

/// One edited field, old → new.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: JsonValue,
    pub to: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer: IdentityId,
    pub reviewed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: IdentityId,
    pub approved_at: DateTime<Utc>,
}

/// Trim, drop empties, lowercase.
pub fn normalize_tags<I, T>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| tag.as_ref().trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Aggregate root: Document Record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    id: DocumentId,
    number: String,
    document_type: String,
    financial_year: i32,
    fields: DocumentFields,
    tags: BTreeSet<String>,
    status: DocumentStatus,
    prepared_by: IdentityId,
    department_id: Option<DepartmentId>,
    review: Option<Review>,
    approval: Option<Approval>,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    created_by: IdentityId,
    updated_at: Option<DateTime<Utc>>,
    updated_by: Option<IdentityId>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<IdentityId>,
    version: u64,
    created: bool,
}

impl DocumentRecord {
    /// Not-yet-created instance; feed it a `Create` command.
    pub fn empty(id: DocumentId) -> Self {
        let nobody = IdentityId::from_uuid(Uuid::nil());
        Self {
            id,
            number: String::new(),
            document_type: String::new(),
            financial_year: 0,
            fields: DocumentFields::new("", NaiveDate::default()),
            tags: BTreeSet::new(),
            status: DocumentStatus::Draft,
            prepared_by: nobody,
            department_id: None,
            review: None,
            approval: None,
            rejection_reason: None,
            created_at: DateTime::<Utc>::default(),
            created_by: nobody,
            updated_at: None,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
            version: 0,
            created: false,
        }
    }

    pub fn document_id(&self) -> DocumentId {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn document_type(&self) -> &str {
        &self.document_type
    }

    pub fn financial_year(&self) -> i32 {
        self.financial_year
    }

    pub fn fields(&self) -> &DocumentFields {
        &self.fields
    }

    pub fn title(&self) -> &str {
        &self.fields.title
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn prepared_by(&self) -> IdentityId {
        self.prepared_by
    }

    pub fn created_by(&self) -> IdentityId {
        self.created_by
    }

    pub fn department_id(&self) -> Option<DepartmentId> {
        self.department_id
    }

    pub fn review(&self) -> Option<&Review> {
        self.review.as_ref()
    }

    pub fn approval(&self) -> Option<&Approval> {
        self.approval.as_ref()
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn updated_by(&self) -> Option<IdentityId> {
        self.updated_by
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn deleted_by(&self) -> Option<IdentityId> {
        self.deleted_by
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_editable(&self) -> bool {
        is_document_editable(self.status)
    }
}

impl AggregateRoot for DocumentRecord {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDocument {
    pub document_id: DocumentId,
    /// Pre-allocated `PREFIX/YEAR/NNNNNN`.
    pub number: String,
    pub document_type: String,
    pub fields: DocumentFields,
    pub tags: BTreeSet<String>,
    pub department_id: Option<DepartmentId>,
    /// `Draft` or `PendingApproval`.
    pub initial_status: DocumentStatus,
    pub actor: IdentityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentCommand {
    Create(CreateDocument),
    Update {
        changes: DocumentChanges,
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    Submit {
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    Review {
        notes: Option<String>,
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    Approve {
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    Reject {
        reason: String,
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    Delete {
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    Restore {
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentCreated {
    pub document_id: DocumentId,
    pub number: String,
    pub document_type: String,
    pub fields: DocumentFields,
    pub tags: BTreeSet<String>,
    pub department_id: Option<DepartmentId>,
    pub status: DocumentStatus,
    pub actor: IdentityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocumentEvent {
    Created(DocumentCreated),
    Updated {
        fields: DocumentFields,
        tags: BTreeSet<String>,
        changes: Vec<FieldChange>,
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    Submitted {
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    Reviewed {
        reviewer: IdentityId,
        notes: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    Approved {
        approver: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    Rejected {
        reason: String,
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    Deleted {
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    },
    Restored {
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    },
}

impl DocumentEvent {
    pub fn actor(&self) -> IdentityId {
        match self {
            DocumentEvent::Created(e) => e.actor,
            DocumentEvent::Updated { actor, .. }
            | DocumentEvent::Submitted { actor, .. }
            | DocumentEvent::Rejected { actor, .. }
            | DocumentEvent::Deleted { actor, .. }
            | DocumentEvent::Restored { actor, .. } => *actor,
            DocumentEvent::Reviewed { reviewer, .. } => *reviewer,
            DocumentEvent::Approved { approver, .. } => *approver,
        }
    }

    /// Activity-log category written for this transition.
    pub fn audit_type(&self) -> AuditEventType {
        match self {
            DocumentEvent::Created(_) => AuditEventType::DocumentCreated,
            DocumentEvent::Updated { .. } => AuditEventType::DocumentUpdated,
            DocumentEvent::Submitted { .. } => AuditEventType::DocumentSubmitted,
            DocumentEvent::Reviewed { .. } => AuditEventType::DocumentReviewed,
            DocumentEvent::Approved { .. } => AuditEventType::DocumentApproved,
            DocumentEvent::Rejected { .. } => AuditEventType::DocumentRejected,
            DocumentEvent::Deleted { .. } => AuditEventType::DocumentDeleted,
            DocumentEvent::Restored { .. } => AuditEventType::DocumentRestored,
        }
    }
}

impl Event for DocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DocumentEvent::Created(_) => "document.created",
            DocumentEvent::Updated { .. } => "document.updated",
            DocumentEvent::Submitted { .. } => "document.submitted",
            DocumentEvent::Reviewed { .. } => "document.reviewed",
            DocumentEvent::Approved { .. } => "document.approved",
            DocumentEvent::Rejected { .. } => "document.rejected",
            DocumentEvent::Deleted { .. } => "document.deleted",
            DocumentEvent::Restored { .. } => "document.restored",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DocumentEvent::Created(e) => e.occurred_at,
            DocumentEvent::Updated { occurred_at, .. }
            | DocumentEvent::Submitted { occurred_at, .. }
            | DocumentEvent::Reviewed { occurred_at, .. }
            | DocumentEvent::Approved { occurred_at, .. }
            | DocumentEvent::Rejected { occurred_at, .. }
            | DocumentEvent::Deleted { occurred_at, .. }
            | DocumentEvent::Restored { occurred_at, .. } => *occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for DocumentRecord {
    type Command = DocumentCommand;
    type Event = DocumentEvent;
    type Error = ArchiveError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DocumentEvent::Created(e) => {
                self.id = e.document_id;
                self.number = e.number.clone();
                self.document_type = e.document_type.clone();
                self.financial_year = e.fields.document_date.year();
                self.fields = e.fields.clone();
                self.tags = e.tags.clone();
                self.department_id = e.department_id;
                self.status = e.status;
                self.prepared_by = e.actor;
                self.created_by = e.actor;
                self.created_at = e.occurred_at;
                self.created = true;
            }
            DocumentEvent::Updated { fields, tags, .. } => {
                self.financial_year = fields.document_date.year();
                self.fields = fields.clone();
                self.tags = tags.clone();
            }
            DocumentEvent::Submitted { .. } => {
                self.status = DocumentStatus::PendingApproval;
            }
            DocumentEvent::Reviewed { reviewer, notes, occurred_at } => {
                self.review = Some(Review {
                    reviewer: *reviewer,
                    reviewed_at: *occurred_at,
                    notes: notes.clone(),
                });
            }
            DocumentEvent::Approved { approver, occurred_at } => {
                self.approval = Some(Approval {
                    approver: *approver,
                    approved_at: *occurred_at,
                });
                self.status = DocumentStatus::Approved;
            }
            DocumentEvent::Rejected { reason, .. } => {
                self.rejection_reason = Some(reason.clone());
                self.status = DocumentStatus::Rejected;
            }
            DocumentEvent::Deleted { actor, occurred_at } => {
                self.status = DocumentStatus::Deleted;
                self.deleted_at = Some(*occurred_at);
                self.deleted_by = Some(*actor);
            }
            DocumentEvent::Restored { .. } => {
                // A restored document starts a fresh approval cycle.
                self.status = DocumentStatus::Draft;
                self.deleted_at = None;
                self.deleted_by = None;
                self.review = None;
                self.approval = None;
                self.rejection_reason = None;
            }
        }

        if !matches!(event, DocumentEvent::Created(_)) {
            self.updated_at = Some(event.occurred_at());
            self.updated_by = Some(event.actor());
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let DocumentCommand::Create(cmd) = command {
            return self.handle_create(cmd);
        }
        if !self.created {
            return Err(ArchiveError::not_found());
        }

        match command {
            DocumentCommand::Create(_) => Err(ArchiveError::validation("document already exists")),
            DocumentCommand::Update { changes, actor, occurred_at } => {
                self.handle_update(changes, *actor, *occurred_at)
            }
            DocumentCommand::Submit { actor, occurred_at } => {
                if self.status != DocumentStatus::Draft {
                    return Err(ArchiveError::transition(format!(
                        "cannot submit a {} document",
                        self.status
                    )));
                }
                Ok(vec![DocumentEvent::Submitted { actor: *actor, occurred_at: *occurred_at }])
            }
            DocumentCommand::Review { notes, actor, occurred_at } => {
                self.ensure_pending("review")?;
                if let Some(review) = &self.review {
                    if review.reviewer != *actor {
                        return Err(ArchiveError::AlreadyReviewed);
                    }
                }
                Ok(vec![DocumentEvent::Reviewed {
                    reviewer: *actor,
                    notes: notes.clone().filter(|n| !n.trim().is_empty()),
                    occurred_at: *occurred_at,
                }])
            }
            DocumentCommand::Approve { actor, occurred_at } => {
                if self.status == DocumentStatus::Deleted {
                    return Err(ArchiveError::transition("cannot approve a deleted document"));
                }
                if let Some(approval) = &self.approval {
                    if approval.approver == *actor {
                        return Ok(Vec::new());
                    }
                    return Err(ArchiveError::AlreadyApproved);
                }
                self.ensure_pending("approve")?;
                Ok(vec![DocumentEvent::Approved { approver: *actor, occurred_at: *occurred_at }])
            }
            DocumentCommand::Reject { reason, actor, occurred_at } => {
                self.ensure_pending("reject")?;
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(ArchiveError::validation("a rejection reason is required"));
                }
                Ok(vec![DocumentEvent::Rejected {
                    reason: reason.to_string(),
                    actor: *actor,
                    occurred_at: *occurred_at,
                }])
            }
            DocumentCommand::Delete { actor, occurred_at } => {
                if self.status == DocumentStatus::Deleted {
                    return Err(ArchiveError::transition("document is already deleted"));
                }
                Ok(vec![DocumentEvent::Deleted { actor: *actor, occurred_at: *occurred_at }])
            }
            DocumentCommand::Restore { actor, occurred_at } => {
                if self.status != DocumentStatus::Deleted {
                    return Err(ArchiveError::transition("only deleted documents can be restored"));
                }
                Ok(vec![DocumentEvent::Restored { actor: *actor, occurred_at: *occurred_at }])
            }
        }
    }
}

impl DocumentRecord {
    fn ensure_pending(&self, action: &str) -> Result<(), ArchiveError> {
        if self.status != DocumentStatus::PendingApproval {
            return Err(ArchiveError::transition(format!(
                "cannot {action} a {} document",
                self.status
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateDocument) -> Result<Vec<DocumentEvent>, ArchiveError> {
        if self.created {
            return Err(ArchiveError::validation("document already exists"));
        }
        if !matches!(cmd.initial_status, DocumentStatus::Draft | DocumentStatus::PendingApproval) {
            return Err(ArchiveError::transition(format!(
                "documents cannot be created as {}",
                cmd.initial_status
            )));
        }
        if cmd.document_type.trim().is_empty() {
            return Err(ArchiveError::validation("document type is required"));
        }
        if cmd.number.is_empty() {
            return Err(ArchiveError::validation("document number is required"));
        }
        cmd.fields.validate()?;

        let mut fields = cmd.fields.clone();
        fields.title = fields.title.trim().to_string();

        Ok(vec![DocumentEvent::Created(DocumentCreated {
            document_id: cmd.document_id,
            number: cmd.number.clone(),
            document_type: cmd.document_type.trim().to_string(),
            fields,
            tags: normalize_tags(&cmd.tags),
            department_id: cmd.department_id,
            status: cmd.initial_status,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(
        &self,
        changes: &DocumentChanges,
        actor: IdentityId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<DocumentEvent>, ArchiveError> {
        if !self.is_editable() {
            return Err(ArchiveError::transition(format!(
                "a {} document cannot be edited",
                self.status
            )));
        }

        let mut fields = self.fields.clone();
        let mut tags = self.tags.clone();
        let mut diff = Vec::new();

        track(&mut diff, "title", &mut fields.title, changes.title.as_ref().map(|t| t.trim().to_string()));
        track(&mut diff, "description", &mut fields.description, changes.description.clone());
        track(&mut diff, "keywords", &mut fields.keywords, changes.keywords.clone());
        track(&mut diff, "document_date", &mut fields.document_date, changes.document_date);
        track(&mut diff, "amount", &mut fields.amount, changes.amount);
        track(&mut diff, "currency", &mut fields.currency, changes.currency.clone());
        track(&mut diff, "confidentiality", &mut fields.confidentiality, changes.confidentiality);
        track(&mut diff, "access_level", &mut fields.access_level, changes.access_level);
        track(&mut diff, "allowed_users", &mut fields.allowed_users, changes.allowed_users.clone());
        track(&mut diff, "notes", &mut fields.notes, changes.notes.clone());
        track(&mut diff, "expiry_date", &mut fields.expiry_date, changes.expiry_date);
        track(&mut diff, "category_id", &mut fields.category_id, changes.category_id);
        track(&mut diff, "subcategory_id", &mut fields.subcategory_id, changes.subcategory_id);
        track(&mut diff, "tags", &mut tags, changes.tags.as_ref().map(normalize_tags));

        if diff.is_empty() {
            return Err(ArchiveError::validation("no changes"));
        }
        fields.validate()?;

        Ok(vec![DocumentEvent::Updated {
            fields,
            tags,
            changes: diff,
            actor,
            occurred_at,
        }])
    }
}

fn track<T>(diff: &mut Vec<FieldChange>, field: &str, current: &mut T, proposed: Option<T>)
where
    T: PartialEq + Serialize,
{
    let Some(value) = proposed else {
        return;
    };
    if *current == value {
        return;
    }
    diff.push(FieldChange {
        field: field.to_string(),
        from: serde_json::to_value(&*current).unwrap_or(JsonValue::Null),
        to: serde_json::to_value(&value).unwrap_or(JsonValue::Null),
    });
    *current = value;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap()
    }

    pub fn person(n: u128) -> IdentityId {
        IdentityId::from_uuid(Uuid::from_u128(n))
    }

    pub fn department(n: u128) -> DepartmentId {
        DepartmentId::from_uuid(Uuid::from_u128(n))
    }

    pub fn create_command(actor: IdentityId, department: Option<DepartmentId>) -> CreateDocument {
        let mut fields = DocumentFields::new("Quarterly invoice", NaiveDate::from_ymd_opt(2024, 4, 30).unwrap());
        fields.amount = Some(125_000);
        CreateDocument {
            document_id: DocumentId::new(),
            number: "INV/2024/000001".to_string(),
            document_type: "invoice".to_string(),
            fields,
            tags: normalize_tags(["Finance", " q2 "]),
            department_id: department,
            initial_status: DocumentStatus::Draft,
            actor,
            occurred_at: at(),
        }
    }

    /// A created record with the given status and shape.
    pub fn record(
        preparer: IdentityId,
        department: Option<DepartmentId>,
        configure: impl FnOnce(&mut DocumentFields),
    ) -> DocumentRecord {
        let mut cmd = create_command(preparer, department);
        configure(&mut cmd.fields);
        let mut record = DocumentRecord::empty(cmd.document_id);
        record.execute(&DocumentCommand::Create(cmd)).unwrap();
        record
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use proptest::prelude::*;

    fn pending(preparer: IdentityId) -> DocumentRecord {
        let mut record = record(preparer, Some(department(1)), |_| {});
        record
            .execute(&DocumentCommand::Submit { actor: preparer, occurred_at: at() })
            .unwrap();
        record
    }

    #[test]
    fn create_emits_created_and_derives_financial_year() {
        let record = record(person(1), Some(department(1)), |_| {});
        assert!(record.is_created());
        assert_eq!(record.status(), DocumentStatus::Draft);
        assert_eq!(record.financial_year(), 2024);
        assert_eq!(record.prepared_by(), person(1));
        assert_eq!(record.tags().iter().collect::<Vec<_>>(), ["finance", "q2"]);
        assert_eq!(record.version(), 1);
    }

    #[test]
    fn create_only_accepts_draft_or_pending() {
        for status in DocumentStatus::ALL {
            let mut cmd = create_command(person(1), None);
            cmd.initial_status = status;
            let result = DocumentRecord::empty(cmd.document_id).handle(&DocumentCommand::Create(cmd));
            match status {
                DocumentStatus::Draft | DocumentStatus::PendingApproval => assert!(result.is_ok()),
                _ => assert!(matches!(result.unwrap_err(), ArchiveError::InvalidTransition(_))),
            }
        }
    }

    #[test]
    fn create_requires_title() {
        let mut cmd = create_command(person(1), None);
        cmd.fields.title = "   ".into();
        match DocumentRecord::empty(cmd.document_id).handle(&DocumentCommand::Create(cmd)).unwrap_err() {
            ArchiveError::Validation(msg) if msg.contains("title") => {}
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn commands_on_missing_record_are_not_found() {
        let record = DocumentRecord::empty(DocumentId::new());
        let err = record
            .handle(&DocumentCommand::Submit { actor: person(1), occurred_at: at() })
            .unwrap_err();
        assert_eq!(err, ArchiveError::RecordNotFound);
    }

    #[test]
    fn update_records_each_changed_field() {
        let mut record = record(person(1), None, |_| {});
        let changes = DocumentChanges {
            title: Some("Quarterly invoice".into()),
            amount: Some(Some(130_000)),
            tags: Some(normalize_tags(["finance", "audited"])),
            ..DocumentChanges::default()
        };
        let events = record
            .execute(&DocumentCommand::Update { changes, actor: person(2), occurred_at: at() })
            .unwrap();

        let DocumentEvent::Updated { changes, .. } = &events[0] else {
            panic!("expected Updated");
        };
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, ["amount", "tags"]);
        assert_eq!(changes[0].from, serde_json::json!(125_000));
        assert_eq!(changes[0].to, serde_json::json!(130_000));
        assert_eq!(record.fields().amount, Some(130_000));
        assert_eq!(record.updated_by(), Some(person(2)));
    }

    #[test]
    fn category_moves_are_tracked_and_need_a_parent() {
        let mut record = record(person(1), None, |_| {});
        let ledger = CategoryId::from_uuid(Uuid::from_u128(40));
        let payables = CategoryId::from_uuid(Uuid::from_u128(41));

        let orphan = DocumentChanges {
            subcategory_id: Some(Some(payables)),
            ..DocumentChanges::default()
        };
        match record
            .handle(&DocumentCommand::Update { changes: orphan, actor: person(1), occurred_at: at() })
            .unwrap_err()
        {
            ArchiveError::Validation(msg) if msg.contains("category") => {}
            other => panic!("expected Validation, got {other:?}"),
        }

        let filed = DocumentChanges {
            category_id: Some(Some(ledger)),
            subcategory_id: Some(Some(payables)),
            ..DocumentChanges::default()
        };
        let events = record
            .execute(&DocumentCommand::Update { changes: filed, actor: person(1), occurred_at: at() })
            .unwrap();
        let DocumentEvent::Updated { changes, .. } = &events[0] else {
            panic!("expected Updated");
        };
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, ["category_id", "subcategory_id"]);
        assert_eq!(record.fields().subcategory_id, Some(payables));
    }

    #[test]
    fn update_without_changes_is_rejected() {
        let record = record(person(1), None, |_| {});
        let same = DocumentChanges {
            title: Some("Quarterly invoice".into()),
            ..DocumentChanges::default()
        };
        match record
            .handle(&DocumentCommand::Update { changes: same, actor: person(1), occurred_at: at() })
            .unwrap_err()
        {
            ArchiveError::Validation(msg) if msg.contains("no changes") => {}
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn approved_documents_are_frozen() {
        let mut record = pending(person(1));
        record
            .execute(&DocumentCommand::Approve { actor: person(9), occurred_at: at() })
            .unwrap();
        assert!(!record.is_editable());

        let changes = DocumentChanges { notes: Some(Some("late".into())), ..DocumentChanges::default() };
        assert!(matches!(
            record
                .handle(&DocumentCommand::Update { changes, actor: person(1), occurred_at: at() })
                .unwrap_err(),
            ArchiveError::InvalidTransition(_)
        ));
    }

    #[test]
    fn review_by_another_reviewer_is_refused_but_same_reviewer_overwrites() {
        let mut record = pending(person(1));
        record
            .execute(&DocumentCommand::Review { notes: Some("first".into()), actor: person(7), occurred_at: at() })
            .unwrap();

        let err = record
            .handle(&DocumentCommand::Review { notes: None, actor: person(8), occurred_at: at() })
            .unwrap_err();
        assert_eq!(err, ArchiveError::AlreadyReviewed);

        record
            .execute(&DocumentCommand::Review { notes: Some("second".into()), actor: person(7), occurred_at: at() })
            .unwrap();
        assert_eq!(record.review().unwrap().notes.as_deref(), Some("second"));
    }

    #[test]
    fn approval_is_idempotent_for_the_same_approver_only() {
        let mut record = pending(person(1));
        record
            .execute(&DocumentCommand::Approve { actor: person(9), occurred_at: at() })
            .unwrap();
        let version = record.version();

        let again = record
            .execute(&DocumentCommand::Approve { actor: person(9), occurred_at: at() })
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(record.version(), version);

        let err = record
            .handle(&DocumentCommand::Approve { actor: person(10), occurred_at: at() })
            .unwrap_err();
        assert_eq!(err, ArchiveError::AlreadyApproved);
    }

    #[test]
    fn decisions_require_pending_approval() {
        let draft = record(person(1), None, |_| {});
        let commands = [
            DocumentCommand::Review { notes: None, actor: person(7), occurred_at: at() },
            DocumentCommand::Approve { actor: person(9), occurred_at: at() },
            DocumentCommand::Reject { reason: "no".into(), actor: person(9), occurred_at: at() },
        ];
        for cmd in commands {
            assert!(matches!(draft.handle(&cmd).unwrap_err(), ArchiveError::InvalidTransition(_)));
        }
    }

    #[test]
    fn reject_needs_a_reason() {
        let mut record = pending(person(1));
        assert!(matches!(
            record
                .handle(&DocumentCommand::Reject { reason: " ".into(), actor: person(9), occurred_at: at() })
                .unwrap_err(),
            ArchiveError::Validation(_)
        ));
        record
            .execute(&DocumentCommand::Reject { reason: "missing stamp".into(), actor: person(9), occurred_at: at() })
            .unwrap();
        assert_eq!(record.status(), DocumentStatus::Rejected);
        assert_eq!(record.rejection_reason(), Some("missing stamp"));
    }

    #[test]
    fn delete_and_restore_round_trip_to_a_fresh_draft() {
        let mut record = pending(person(1));
        record
            .execute(&DocumentCommand::Review { notes: None, actor: person(7), occurred_at: at() })
            .unwrap();
        record
            .execute(&DocumentCommand::Delete { actor: person(1), occurred_at: at() })
            .unwrap();
        assert_eq!(record.deleted_by(), Some(person(1)));
        assert!(matches!(
            record
                .handle(&DocumentCommand::Delete { actor: person(1), occurred_at: at() })
                .unwrap_err(),
            ArchiveError::InvalidTransition(_)
        ));

        record
            .execute(&DocumentCommand::Restore { actor: person(2), occurred_at: at() })
            .unwrap();
        assert_eq!(record.status(), DocumentStatus::Draft);
        assert!(record.review().is_none());
        assert!(record.deleted_at().is_none());
    }

    #[test]
    fn restore_requires_deleted() {
        let record = record(person(1), None, |_| {});
        assert!(matches!(
            record
                .handle(&DocumentCommand::Restore { actor: person(2), occurred_at: at() })
                .unwrap_err(),
            ArchiveError::InvalidTransition(_)
        ));
    }

    fn any_command() -> impl Strategy<Value = DocumentCommand> {
        let actor = (1u128..4).prop_map(person);
        prop_oneof![
            actor.clone().prop_map(|actor| DocumentCommand::Submit { actor, occurred_at: at() }),
            actor.clone().prop_map(|actor| DocumentCommand::Review { notes: None, actor, occurred_at: at() }),
            actor.clone().prop_map(|actor| DocumentCommand::Approve { actor, occurred_at: at() }),
            actor.clone().prop_map(|actor| DocumentCommand::Reject { reason: "r".into(), actor, occurred_at: at() }),
            actor.clone().prop_map(|actor| DocumentCommand::Delete { actor, occurred_at: at() }),
            actor.prop_map(|actor| DocumentCommand::Restore { actor, occurred_at: at() }),
        ]
    }

    fn allowed(from: DocumentStatus, to: DocumentStatus) -> bool {
        use DocumentStatus::*;
        from == to
            || matches!(
                (from, to),
                (Draft, PendingApproval)
                    | (PendingApproval, Approved)
                    | (PendingApproval, Rejected)
                    | (Deleted, Draft)
            )
            || (from != Deleted && to == Deleted)
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn status_only_moves_along_the_state_machine(commands in prop::collection::vec(any_command(), 0..24)) {
            let mut record = record(person(1), Some(department(1)), |_| {});
            for cmd in &commands {
                let before = record.status();
                let version = record.version();
                match record.execute(cmd) {
                    Ok(events) => {
                        prop_assert!(allowed(before, record.status()), "{before} -> {}", record.status());
                        prop_assert_eq!(record.version(), version + events.len() as u64);
                    }
                    Err(_) => {
                        prop_assert_eq!(record.status(), before);
                        prop_assert_eq!(record.version(), version);
                    }
                }
            }
        }
    }
}
