use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use archive_core::DocumentId;

/// Permission identifier.
///
/// Permissions are opaque snake_case strings (e.g. "approve_documents"). The
/// well-known names live in [`names`]; grants may carry any string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// Entity a resource-scoped grant is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn document(id: DocumentId) -> Self {
        Self::new("document", id.to_string())
    }
}

impl core::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

pub mod names {
    pub const MANAGE_USERS: &str = "manage_users";
    pub const MANAGE_DEPARTMENTS: &str = "manage_departments";
    pub const MANAGE_SYSTEM: &str = "manage_system";
    pub const SYSTEM_SETTINGS: &str = "system_settings";
    pub const BACKUP_RESTORE: &str = "backup_restore";
    pub const AUDIT_LOGS: &str = "audit_logs";

    pub const VIEW_DOCUMENTS: &str = "view_documents";
    pub const VIEW_ALL_DOCUMENTS: &str = "view_all_documents";
    pub const UPLOAD_DOCUMENTS: &str = "upload_documents";
    pub const EDIT_OWN_DOCUMENTS: &str = "edit_own_documents";
    pub const EDIT_DOCUMENTS: &str = "edit_documents";
    pub const EDIT_ALL_DOCUMENTS: &str = "edit_all_documents";
    pub const DELETE_DOCUMENTS: &str = "delete_documents";
    pub const RESTORE_DOCUMENTS: &str = "restore_documents";
    pub const APPROVE_DOCUMENTS: &str = "approve_documents";
    pub const APPROVE_DEPARTMENT_DOCUMENTS: &str = "approve_department_documents";
    pub const APPROVE_ALL: &str = "approve_all";

    pub const VIEW_REPORTS: &str = "view_reports";
    pub const VIEW_OWN_REPORTS: &str = "view_own_reports";
    pub const VIEW_DEPARTMENT_REPORTS: &str = "view_department_reports";
    pub const VIEW_FINANCIAL_REPORTS: &str = "view_financial_reports";
    pub const VIEW_HR_REPORTS: &str = "view_hr_reports";
    pub const EXPORT_DATA: &str = "export_data";
    pub const EXPORT_OWN_DATA: &str = "export_own_data";
    pub const EXPORT_FINANCIAL: &str = "export_financial";
    pub const EXPORT_HR: &str = "export_hr";

    pub const MANAGE_FINANCIAL: &str = "manage_financial";
    pub const APPROVE_PAYMENTS: &str = "approve_payments";
    pub const MANAGE_BUDGET: &str = "manage_budget";
    pub const MANAGE_HR: &str = "manage_hr";
    pub const APPROVE_VACATIONS: &str = "approve_vacations";
    pub const MANAGE_CONTRACTS: &str = "manage_contracts";
    pub const MANAGE_DEPARTMENT: &str = "manage_department";
}
