//! Who may do what to a given document.
//!
//! Role defaults and grants come from the [`PermissionResolver`]; the record
//! supplies ownership, department and status. Every function answers with a
//! plain bool so the caller decides how to audit a refusal.

use archive_auth::{Identity, IdentityStore, PermissionResolver, RequestContext, ResourceRef, Role, names};
use archive_core::{ArchiveResult, IdentityId};
use archive_documents::{AccessScope, DocumentRecord, DocumentStatus, Viewer};

/// Visibility inputs for the caller. `bypass` is super_admin or `view_all_documents`.
pub fn viewer_for<S: IdentityStore>(
    resolver: &PermissionResolver<S>,
    ctx: &RequestContext,
) -> ArchiveResult<Viewer> {
    viewer_of(resolver, ctx.identity())
}

pub fn viewer_of<S: IdentityStore>(
    resolver: &PermissionResolver<S>,
    identity: &Identity,
) -> ArchiveResult<Viewer> {
    let bypass = identity.role == Role::SuperAdmin
        || resolver.has_permission(identity.id, names::VIEW_ALL_DOCUMENTS, None)?;
    Ok(Viewer {
        identity_id: identity.id,
        department_id: identity.department_id,
        bypass,
    })
}

fn holds<S: IdentityStore>(
    resolver: &PermissionResolver<S>,
    identity_id: IdentityId,
    permission: &str,
    record: &DocumentRecord,
) -> ArchiveResult<bool> {
    let resource = ResourceRef::document(record.document_id());
    resolver.has_permission(identity_id, permission, Some(&resource))
}

fn owns(ctx: &RequestContext, record: &DocumentRecord) -> bool {
    record.prepared_by() == ctx.identity_id() || record.created_by() == ctx.identity_id()
}

/// `edit_all_documents`; `edit_documents` on anything visible; `edit_own_documents` on own rows.
///
/// Status is not considered here; see [`archive_documents::is_document_editable`].
pub fn can_edit_document<S: IdentityStore>(
    resolver: &PermissionResolver<S>,
    ctx: &RequestContext,
    record: &DocumentRecord,
) -> ArchiveResult<bool> {
    let id = ctx.identity_id();
    if holds(resolver, id, names::EDIT_ALL_DOCUMENTS, record)? {
        return Ok(true);
    }
    if holds(resolver, id, names::EDIT_DOCUMENTS, record)? {
        let scope = AccessScope::for_viewer(&viewer_for(resolver, ctx)?);
        if scope.permits(record) {
            return Ok(true);
        }
    }
    Ok(owns(ctx, record) && holds(resolver, id, names::EDIT_OWN_DOCUMENTS, record)?)
}

/// Approve, review and reject share one rule.
pub fn can_approve_document<S: IdentityStore>(
    resolver: &PermissionResolver<S>,
    ctx: &RequestContext,
    record: &DocumentRecord,
) -> ArchiveResult<bool> {
    may_approve(resolver, ctx.identity(), record)
}

/// [`can_approve_document`] for an identity outside any request.
pub fn may_approve<S: IdentityStore>(
    resolver: &PermissionResolver<S>,
    identity: &Identity,
    record: &DocumentRecord,
) -> ArchiveResult<bool> {
    let id = identity.id;
    if resolver.has_permission(id, names::APPROVE_ALL, None)?
        || resolver.has_permission(id, names::APPROVE_DOCUMENTS, None)?
    {
        return Ok(true);
    }

    let same_department =
        identity.department_id.is_some() && identity.department_id == record.department_id();
    if same_department && resolver.has_permission(id, names::APPROVE_DEPARTMENT_DOCUMENTS, None)? {
        return Ok(true);
    }

    holds(resolver, id, names::APPROVE_DOCUMENTS, record)
}

/// Soft delete: `delete_documents`, or the preparer while the document is a draft.
pub fn can_delete_document<S: IdentityStore>(
    resolver: &PermissionResolver<S>,
    ctx: &RequestContext,
    record: &DocumentRecord,
) -> ArchiveResult<bool> {
    if holds(resolver, ctx.identity_id(), names::DELETE_DOCUMENTS, record)? {
        return Ok(true);
    }
    Ok(record.prepared_by() == ctx.identity_id() && record.status() == DocumentStatus::Draft)
}

pub fn can_purge_document<S: IdentityStore>(
    resolver: &PermissionResolver<S>,
    ctx: &RequestContext,
    record: &DocumentRecord,
) -> ArchiveResult<bool> {
    holds(resolver, ctx.identity_id(), names::DELETE_DOCUMENTS, record)
}

pub fn can_restore_document<S: IdentityStore>(
    resolver: &PermissionResolver<S>,
    ctx: &RequestContext,
    record: &DocumentRecord,
) -> ArchiveResult<bool> {
    holds(resolver, ctx.identity_id(), names::RESTORE_DOCUMENTS, record)
}
