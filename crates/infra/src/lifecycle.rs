//! Document lifecycle orchestration.
//!
//! The [`DocumentLifecycleEngine`] runs every document operation through the
//! same pipeline:
//!
//! ```text
//! RequestContext (resolved by the IdentityManager)
//!   ↓
//! 1. Build the caller's AccessScope (visibility predicate)
//!   ↓
//! 2. Begin transaction; load the record through that scope
//!   ↓
//! 3. Check eligibility (PermissionResolver + record ownership)
//!   ↓
//! 4. Handle the command on the aggregate (pure, produces events)
//!   ↓
//! 5. Persist row, revisions, versions and activity; commit
//!   ↓
//! 6. Notify and log
//! ```
//!
//! A refusal at step 3 is written to the audit log after the rollback, so it
//! survives the failed transaction. When a step after an upload fails, the
//! uploaded object is deleted again.
//!
//! Loading happens inside the transaction, so two racing approvals are decided
//! against the state the first one committed.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use archive_auth::{Identity, IdentityStore, PermissionResolver, RequestContext};
use archive_core::{
    Aggregate, ArchiveError, ArchiveResult, CategoryId, Clock, DocumentId, transaction,
};
use archive_documents::{
    AccessScope, Clause, CreateDocument, DocumentChanges, DocumentCommand, DocumentConfig,
    DocumentEvent, DocumentFields, DocumentFilter, DocumentRecord, DocumentRevision, DocumentStatus,
    DocumentVersion, Page, Predicate, SearchPage, access_conditions, in_category, listing_order,
    next_version_number, paginate, prefix_for,
};
use archive_events::{
    AuditEventType, AuditLog, AuditRecord, Event, NotificationKind, Notifier, notify, record_or_warn,
};

use crate::eligibility::{
    can_approve_document, can_delete_document, can_edit_document, can_purge_document,
    can_restore_document, may_approve, viewer_for, viewer_of,
};
use crate::storage::{Storage, StoredObject, UploadMeta};
use crate::store::ArchiveStore;

type Rule<S> = fn(&PermissionResolver<S>, &RequestContext, &DocumentRecord) -> ArchiveResult<bool>;

/// A file handed in with a create, update or new-version request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
    pub change_note: Option<String>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: None,
            bytes: bytes.into(),
            change_note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.change_note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub document_type: String,
    pub fields: DocumentFields,
    pub tags: Vec<String>,
    /// Start in `pending_approval` instead of `draft`.
    pub submit: bool,
    /// Becomes version 1.
    pub file: Option<Upload>,
}

impl NewDocument {
    pub fn new(document_type: impl Into<String>, fields: DocumentFields) -> Self {
        Self {
            document_type: document_type.into(),
            fields,
            tags: Vec::new(),
            submit: false,
            file: None,
        }
    }
}

/// A document with its file versions and edit history.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentDetail {
    pub record: DocumentRecord,
    pub versions: Vec<DocumentVersion>,
    pub revisions: Vec<DocumentRevision>,
}

pub struct DocumentLifecycleEngine<S, A, F> {
    resolver: PermissionResolver<S>,
    store: Arc<A>,
    storage: Arc<F>,
    config: DocumentConfig,
    audit: Arc<dyn AuditLog>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl<S, A, F> DocumentLifecycleEngine<S, A, F>
where
    S: IdentityStore,
    A: ArchiveStore,
    F: Storage,
{
    pub fn new(
        resolver: PermissionResolver<S>,
        store: Arc<A>,
        storage: Arc<F>,
        config: DocumentConfig,
        audit: Arc<dyn AuditLog>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            store,
            storage,
            config,
            audit,
            notifier,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<A> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Number, persist and (optionally) attach the first file, all or nothing.
    pub fn create(&self, ctx: &RequestContext, new: NewDocument) -> ArchiveResult<DocumentRecord> {
        let now = self.clock.now();
        let document_id = DocumentId::new();
        let prefix = prefix_for(&new.document_type, &self.config.number_prefixes);
        let year = new.fields.document_date.year();
        let initial_status = if new.submit {
            DocumentStatus::PendingApproval
        } else {
            DocumentStatus::Draft
        };

        let mut uploaded = None;
        let result = transaction(self.store.as_ref(), || {
            let number = self.store.next_number(&prefix, year)?;
            let command = DocumentCommand::Create(CreateDocument {
                document_id,
                number: number.to_string(),
                document_type: new.document_type.clone(),
                fields: new.fields.clone(),
                tags: new.tags.iter().cloned().collect(),
                department_id: ctx.department_id(),
                initial_status,
                actor: ctx.identity_id(),
                occurred_at: now,
            });

            let mut record = DocumentRecord::empty(document_id);
            let events = record.execute(&command)?;
            self.store.insert_document(&record)?;
            for event in &events {
                self.store.record_activity(self.activity(ctx, &record, event))?;
            }
            if let Some(file) = &new.file {
                self.store_version(ctx, &record, file, now, &mut uploaded)?;
            }
            Ok(record)
        });

        let record = result.inspect_err(|_| self.compensate(uploaded.take()))?;
        info!(
            document = %record.number(),
            actor = %ctx.identity_id(),
            status = %record.status(),
            "document created"
        );
        if record.status() == DocumentStatus::PendingApproval {
            self.request_approval(ctx, &record);
        }
        Ok(record)
    }

    /// Edit metadata. A file, when given, is stored as the next version in the same transaction.
    pub fn update(
        &self,
        ctx: &RequestContext,
        document_id: DocumentId,
        changes: DocumentChanges,
        file: Option<Upload>,
    ) -> ArchiveResult<DocumentRecord> {
        let now = self.clock.now();
        let scope = self.scope(ctx)?;
        let command = DocumentCommand::Update {
            changes,
            actor: ctx.identity_id(),
            occurred_at: now,
        };

        let mut uploaded = None;
        let result = transaction(self.store.as_ref(), || {
            let mut record = self.load(document_id, &scope)?;
            self.authorize(ctx, &record, "edit", can_edit_document::<S>)?;
            if let Some(file) = &file {
                self.store_version(ctx, &record, file, now, &mut uploaded)?;
            }
            let events = self.persist(ctx, &mut record, &command)?;
            Ok((record, events))
        });

        let (record, events) = result
            .inspect_err(|_| self.compensate(uploaded.take()))
            .map_err(|err| self.refused(ctx, document_id, "edit", err))?;
        self.announce(ctx, &record, &events);
        Ok(record)
    }

    pub fn submit(&self, ctx: &RequestContext, document_id: DocumentId) -> ArchiveResult<DocumentRecord> {
        let command = DocumentCommand::Submit {
            actor: ctx.identity_id(),
            occurred_at: self.clock.now(),
        };
        self.transition(ctx, document_id, "submit", self.scope(ctx)?, can_edit_document::<S>, command)
    }

    /// Re-reviewing by the same reviewer overwrites the notes.
    pub fn review(
        &self,
        ctx: &RequestContext,
        document_id: DocumentId,
        notes: Option<String>,
    ) -> ArchiveResult<DocumentRecord> {
        let command = DocumentCommand::Review {
            notes,
            actor: ctx.identity_id(),
            occurred_at: self.clock.now(),
        };
        self.transition(ctx, document_id, "review", self.scope(ctx)?, can_approve_document::<S>, command)
    }

    /// Approving twice as the same approver returns the record unchanged.
    pub fn approve(&self, ctx: &RequestContext, document_id: DocumentId) -> ArchiveResult<DocumentRecord> {
        let command = DocumentCommand::Approve {
            actor: ctx.identity_id(),
            occurred_at: self.clock.now(),
        };
        self.transition(ctx, document_id, "approve", self.scope(ctx)?, can_approve_document::<S>, command)
    }

    pub fn reject(
        &self,
        ctx: &RequestContext,
        document_id: DocumentId,
        reason: impl Into<String>,
    ) -> ArchiveResult<DocumentRecord> {
        let command = DocumentCommand::Reject {
            reason: reason.into(),
            actor: ctx.identity_id(),
            occurred_at: self.clock.now(),
        };
        self.transition(ctx, document_id, "reject", self.scope(ctx)?, can_approve_document::<S>, command)
    }

    /// Soft delete.
    pub fn delete(&self, ctx: &RequestContext, document_id: DocumentId) -> ArchiveResult<DocumentRecord> {
        let command = DocumentCommand::Delete {
            actor: ctx.identity_id(),
            occurred_at: self.clock.now(),
        };
        self.transition(ctx, document_id, "delete", self.scope(ctx)?, can_delete_document::<S>, command)
    }

    /// Back to `draft`, with a fresh approval cycle.
    pub fn restore(&self, ctx: &RequestContext, document_id: DocumentId) -> ArchiveResult<DocumentRecord> {
        let command = DocumentCommand::Restore {
            actor: ctx.identity_id(),
            occurred_at: self.clock.now(),
        };
        let scope = self.scope(ctx)?.including_deleted();
        self.transition(ctx, document_id, "restore", scope, can_restore_document::<S>, command)
    }

    /// Remove the row, its versions and revisions for good.
    ///
    /// Stored files are deleted after the commit; a failure there is only logged.
    /// The number series keeps its high-water mark.
    pub fn purge(&self, ctx: &RequestContext, document_id: DocumentId) -> ArchiveResult<()> {
        let now = self.clock.now();
        let scope = self.scope(ctx)?.including_deleted();

        let result = transaction(self.store.as_ref(), || {
            let record = self.load(document_id, &scope)?;
            self.authorize(ctx, &record, "purge", can_purge_document::<S>)?;
            let removed = self.store.purge_document(document_id)?;
            self.store.record_activity(
                AuditRecord::new(AuditEventType::DocumentPurged, now)
                    .by(ctx.identity_id())
                    .about(document_id)
                    .from_origin(ctx.fingerprint())
                    .details(json!({
                        "number": record.number(),
                        "versions": removed.len(),
                    })),
            )?;
            Ok((record, removed))
        });

        let (record, removed) = result.map_err(|err| self.refused(ctx, document_id, "purge", err))?;
        for version in &removed {
            if let Err(err) = self.storage.delete(&version.storage_path) {
                warn!(path = %version.storage_path, error = %err, "stored file left behind after purge");
            }
        }
        info!(document = %record.number(), actor = %ctx.identity_id(), "document purged");
        Ok(())
    }

    /// Attach a new file generation. Status is left alone.
    pub fn create_new_version(
        &self,
        ctx: &RequestContext,
        document_id: DocumentId,
        file: Upload,
    ) -> ArchiveResult<DocumentVersion> {
        let now = self.clock.now();
        let scope = self.scope(ctx)?;

        let mut uploaded = None;
        let result = transaction(self.store.as_ref(), || {
            let record = self.load(document_id, &scope)?;
            if record.status() == DocumentStatus::Deleted {
                return Err(ArchiveError::transition("cannot add a version to a deleted document"));
            }
            self.authorize(ctx, &record, "add a version to", can_edit_document::<S>)?;
            let version = self.store_version(ctx, &record, &file, now, &mut uploaded)?;
            Ok((record, version))
        });

        let (record, version) = result
            .inspect_err(|_| self.compensate(uploaded.take()))
            .map_err(|err| self.refused(ctx, document_id, "add a version to", err))?;
        info!(
            document = %record.number(),
            version = version.version,
            actor = %ctx.identity_id(),
            "document version stored"
        );
        Ok(version)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Visibility predicate for the caller.
    pub fn access_conditions(&self, ctx: &RequestContext) -> ArchiveResult<Predicate> {
        Ok(access_conditions(&viewer_for(&self.resolver, ctx)?))
    }

    pub fn get_document(&self, ctx: &RequestContext, document_id: DocumentId) -> ArchiveResult<DocumentDetail> {
        let record = self.load(document_id, &self.scope(ctx)?)?;
        Ok(DocumentDetail {
            versions: self.store.versions(document_id)?,
            revisions: self.store.revisions(document_id)?,
            record,
        })
    }

    /// Filtered, access-scoped, newest first.
    pub fn search_documents(
        &self,
        ctx: &RequestContext,
        filter: &DocumentFilter,
        page: Option<usize>,
        per_page: Option<usize>,
    ) -> ArchiveResult<SearchPage<DocumentRecord>> {
        let scope = self.scope(ctx)?;
        let matches = self.store.query_documents(&scope, &filter.to_predicate())?;
        let page = Page::new(page.unwrap_or(1), self.config.page_size(per_page));
        Ok(paginate(matches, page))
    }

    /// Pending documents the caller prepared, reviewed or is eligible to decide on.
    /// Oldest document date first.
    pub fn pending_approvals(&self, ctx: &RequestContext) -> ArchiveResult<Vec<DocumentRecord>> {
        let scope = self.scope(ctx)?;
        let pending = Predicate::from(Clause::StatusIs(DocumentStatus::PendingApproval));
        let me = ctx.identity_id();

        let mut queue = Vec::new();
        for record in self.store.query_documents(&scope, &pending)? {
            let involved = record.prepared_by() == me
                || record.review().is_some_and(|r| r.reviewer == me)
                || record.approval().is_some_and(|a| a.approver == me);
            if involved || can_approve_document(&self.resolver, ctx, &record)? {
                queue.push(record);
            }
        }
        queue.sort_by(|a, b| {
            a.fields()
                .document_date
                .cmp(&b.fields().document_date)
                .then_with(|| a.number().cmp(b.number()))
        });
        Ok(queue)
    }

    /// Visible documents filed under `category`, newest first.
    pub fn documents_by_category(
        &self,
        ctx: &RequestContext,
        category: CategoryId,
        include_subcategories: bool,
    ) -> ArchiveResult<Vec<DocumentRecord>> {
        let scope = self.scope(ctx)?;
        let mut records = self
            .store
            .query_documents(&scope, &in_category(category, include_subcategories))?;
        records.sort_by(listing_order);
        Ok(records)
    }

    /// Visible documents whose expiry date falls between today and `within_days` from now,
    /// soonest first.
    pub fn expiring_documents(&self, ctx: &RequestContext, within_days: u32) -> ArchiveResult<Vec<DocumentRecord>> {
        let scope = self.scope(ctx)?;
        let today = self.clock.now().date_naive();
        let horizon = today + Duration::days(i64::from(within_days));
        let window = Predicate::from(Clause::ExpiresFrom(today)).and(Clause::ExpiresTo(horizon).into());

        let mut records = self.store.query_documents(&scope, &window)?;
        records.sort_by(|a, b| {
            a.fields()
                .expiry_date
                .cmp(&b.fields().expiry_date)
                .then_with(|| a.number().cmp(b.number()))
        });
        Ok(records)
    }

    /// Active identities who could see and decide on `record`, its preparer excluded.
    pub fn eligible_approvers(&self, record: &DocumentRecord) -> ArchiveResult<Vec<Identity>> {
        let mut approvers = Vec::new();
        for identity in self.resolver.active_identities()? {
            if identity.id == record.prepared_by() {
                continue;
            }
            let visible = AccessScope::for_viewer(&viewer_of(&self.resolver, &identity)?).permits(record);
            if visible && may_approve(&self.resolver, &identity, record)? {
                approvers.push(identity);
            }
        }
        Ok(approvers)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline steps
    // ─────────────────────────────────────────────────────────────────────────

    fn scope(&self, ctx: &RequestContext) -> ArchiveResult<AccessScope> {
        Ok(AccessScope::for_viewer(&viewer_for(&self.resolver, ctx)?))
    }

    fn load(&self, document_id: DocumentId, scope: &AccessScope) -> ArchiveResult<DocumentRecord> {
        self.store
            .find_document(document_id, scope)?
            .ok_or_else(ArchiveError::not_found)
    }

    fn authorize(
        &self,
        ctx: &RequestContext,
        record: &DocumentRecord,
        action: &str,
        rule: Rule<S>,
    ) -> ArchiveResult<()> {
        if rule(&self.resolver, ctx, record)? {
            Ok(())
        } else {
            Err(ArchiveError::denied(format!(
                "not allowed to {action} document {}",
                record.number()
            )))
        }
    }

    fn transition(
        &self,
        ctx: &RequestContext,
        document_id: DocumentId,
        action: &'static str,
        scope: AccessScope,
        rule: Rule<S>,
        command: DocumentCommand,
    ) -> ArchiveResult<DocumentRecord> {
        let result = transaction(self.store.as_ref(), || {
            let mut record = self.load(document_id, &scope)?;
            self.authorize(ctx, &record, action, rule)?;
            let events = self.persist(ctx, &mut record, &command)?;
            Ok((record, events))
        });

        let (record, events) = result.map_err(|err| self.refused(ctx, document_id, action, err))?;
        if events.is_empty() {
            debug!(document = %record.number(), action, "no-op transition");
        }
        self.announce(ctx, &record, &events);
        Ok(record)
    }

    /// Apply `command` and write the row, revision and activity. Empty events write nothing.
    fn persist(
        &self,
        ctx: &RequestContext,
        record: &mut DocumentRecord,
        command: &DocumentCommand,
    ) -> ArchiveResult<Vec<DocumentEvent>> {
        let events = record.execute(command)?;
        if events.is_empty() {
            return Ok(events);
        }

        self.store.save_document(record)?;
        for event in &events {
            if let DocumentEvent::Updated { changes, actor, occurred_at, .. } = event {
                self.store.insert_revision(&DocumentRevision {
                    document_id: record.document_id(),
                    actor: *actor,
                    changes: changes.clone(),
                    recorded_at: *occurred_at,
                })?;
            }
            self.store.record_activity(self.activity(ctx, record, event))?;
        }
        Ok(events)
    }

    fn activity(&self, ctx: &RequestContext, record: &DocumentRecord, event: &DocumentEvent) -> AuditRecord {
        let mut details = json!({
            "event": event.event_type(),
            "number": record.number(),
            "status": record.status().as_str(),
        });
        match event {
            DocumentEvent::Updated { changes, .. } => details["changes"] = json!(changes),
            DocumentEvent::Reviewed { notes, .. } => details["notes"] = json!(notes),
            DocumentEvent::Rejected { reason, .. } => details["reason"] = json!(reason),
            _ => {}
        }

        AuditRecord::new(event.audit_type(), event.occurred_at())
            .by(event.actor())
            .about(record.document_id())
            .from_origin(ctx.fingerprint())
            .details(details)
    }

    fn store_version(
        &self,
        ctx: &RequestContext,
        record: &DocumentRecord,
        file: &Upload,
        at: DateTime<Utc>,
        uploaded: &mut Option<StoredObject>,
    ) -> ArchiveResult<DocumentVersion> {
        if file.bytes.len() as u64 > self.config.max_file_size {
            return Err(ArchiveError::validation(format!(
                "file exceeds the {} byte limit",
                self.config.max_file_size
            )));
        }

        let existing = self.store.versions(record.document_id())?;
        let meta = UploadMeta {
            document_id: record.document_id(),
            file_name: file.file_name.clone(),
            mime_type: file.mime_type.clone(),
        };
        let stored = self.storage.put(&file.bytes, &meta)?;
        *uploaded = Some(stored.clone());

        let version = DocumentVersion {
            document_id: record.document_id(),
            version: next_version_number(&existing),
            storage_path: stored.path,
            content_hash: stored.content_hash,
            size: stored.size,
            change_note: file.change_note.clone(),
            created_by: ctx.identity_id(),
            created_at: at,
        };
        self.store.insert_version(&version)?;
        self.store.record_activity(
            AuditRecord::new(AuditEventType::DocumentVersionCreated, at)
                .by(ctx.identity_id())
                .about(record.document_id())
                .from_origin(ctx.fingerprint())
                .details(json!({
                    "number": record.number(),
                    "version": version.version,
                    "size": version.size,
                    "content_hash": version.content_hash,
                })),
        )?;
        Ok(version)
    }

    /// Undo an upload whose transaction did not commit.
    fn compensate(&self, uploaded: Option<StoredObject>) {
        let Some(object) = uploaded else {
            return;
        };
        match self.storage.delete(&object.path) {
            Ok(()) => debug!(path = %object.path, "orphaned upload removed"),
            Err(err) => warn!(path = %object.path, error = %err, "orphaned upload could not be removed"),
        }
    }

    /// Audit a permission refusal; pass every error through unchanged.
    fn refused(
        &self,
        ctx: &RequestContext,
        document_id: DocumentId,
        action: &str,
        err: ArchiveError,
    ) -> ArchiveError {
        if let ArchiveError::PermissionDenied(reason) = &err {
            warn!(actor = %ctx.identity_id(), document = %document_id, action, "document operation denied");
            record_or_warn(
                self.audit.as_ref(),
                AuditRecord::new(AuditEventType::PermissionDenied, self.clock.now())
                    .by(ctx.identity_id())
                    .about(document_id)
                    .from_origin(ctx.fingerprint())
                    .details(json!({ "action": action, "reason": reason })),
            );
        }
        err
    }

    fn announce(&self, ctx: &RequestContext, record: &DocumentRecord, events: &[DocumentEvent]) {
        for event in events {
            info!(
                document = %record.number(),
                event = event.event_type(),
                actor = %ctx.identity_id(),
                status = %record.status(),
                "document transition"
            );

            let mut payload = json!({
                "document_id": record.document_id(),
                "number": record.number(),
                "title": record.title(),
            });
            let kind = match event {
                DocumentEvent::Submitted { .. } => {
                    self.request_approval(ctx, record);
                    continue;
                }
                DocumentEvent::Reviewed { .. } => NotificationKind::DocumentReviewed,
                DocumentEvent::Approved { .. } => NotificationKind::DocumentApproved,
                DocumentEvent::Rejected { reason, .. } => {
                    payload["reason"] = json!(reason);
                    NotificationKind::DocumentRejected
                }
                _ => continue,
            };
            notify(self.notifier.as_ref(), record.prepared_by(), kind, payload);
        }
    }

    /// Tell every eligible approver except the submitter that `record` awaits a decision.
    fn request_approval(&self, ctx: &RequestContext, record: &DocumentRecord) {
        let approvers = match self.eligible_approvers(record) {
            Ok(approvers) => approvers,
            Err(err) => {
                warn!(document = %record.number(), error = %err, "approvers could not be resolved");
                return;
            }
        };

        let payload = json!({
            "document_id": record.document_id(),
            "number": record.number(),
            "title": record.title(),
            "submitted_by": ctx.identity_id(),
        });
        for approver in approvers.iter().filter(|a| a.id != ctx.identity_id()) {
            notify(self.notifier.as_ref(), approver.id, NotificationKind::ApprovalRequested, payload.clone());
        }
        debug!(document = %record.number(), approvers = approvers.len(), "approval requested");
    }
}
