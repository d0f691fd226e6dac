use core::str::FromStr;

use serde::{Deserialize, Serialize};

use archive_core::ArchiveError;

use crate::permissions::names::*;

/// Closed set of roles. Every identity holds exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    FinancialManager,
    HrManager,
    DepartmentManager,
    User,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::SuperAdmin,
        Role::Admin,
        Role::FinancialManager,
        Role::HrManager,
        Role::DepartmentManager,
        Role::User,
        Role::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::FinancialManager => "financial_manager",
            Role::HrManager => "hr_manager",
            Role::DepartmentManager => "department_manager",
            Role::User => "user",
            Role::Viewer => "viewer",
        }
    }

    /// The role that passes every permission check.
    pub fn is_bypass(&self) -> bool {
        matches!(self, Role::SuperAdmin)
    }

    /// Permissions implied by the role. Never persisted as grants.
    pub fn default_permissions(&self) -> &'static [&'static str] {
        match self {
            Role::SuperAdmin => &[
                MANAGE_USERS,
                MANAGE_DEPARTMENTS,
                MANAGE_SYSTEM,
                VIEW_ALL_DOCUMENTS,
                EDIT_ALL_DOCUMENTS,
                DELETE_DOCUMENTS,
                APPROVE_ALL,
                VIEW_REPORTS,
                EXPORT_DATA,
                SYSTEM_SETTINGS,
                BACKUP_RESTORE,
                AUDIT_LOGS,
            ],
            Role::Admin => &[
                MANAGE_USERS,
                MANAGE_DEPARTMENTS,
                VIEW_ALL_DOCUMENTS,
                EDIT_DOCUMENTS,
                APPROVE_DOCUMENTS,
                VIEW_REPORTS,
                EXPORT_DATA,
            ],
            Role::FinancialManager => &[
                MANAGE_FINANCIAL,
                APPROVE_PAYMENTS,
                VIEW_FINANCIAL_REPORTS,
                EXPORT_FINANCIAL,
                MANAGE_BUDGET,
            ],
            Role::HrManager => &[
                MANAGE_HR,
                VIEW_HR_REPORTS,
                APPROVE_VACATIONS,
                MANAGE_CONTRACTS,
                EXPORT_HR,
            ],
            Role::DepartmentManager => &[
                MANAGE_DEPARTMENT,
                VIEW_DEPARTMENT_REPORTS,
                APPROVE_DEPARTMENT_DOCUMENTS,
            ],
            Role::User => &[
                VIEW_DOCUMENTS,
                UPLOAD_DOCUMENTS,
                EDIT_OWN_DOCUMENTS,
                VIEW_OWN_REPORTS,
                EXPORT_OWN_DATA,
            ],
            Role::Viewer => &[VIEW_DOCUMENTS],
        }
    }

    pub fn grants(&self, permission: &str) -> bool {
        self.default_permissions().iter().any(|p| *p == permission)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "Unrestricted system administrator",
            Role::Admin => "Administers users, departments and all documents",
            Role::FinancialManager => "Manages financial records, payments and budgets",
            Role::HrManager => "Manages HR records, contracts and vacations",
            Role::DepartmentManager => "Manages and approves documents of one department",
            Role::User => "Uploads and maintains own documents",
            Role::Viewer => "Read-only access to visible documents",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| ArchiveError::validation(format!("unknown role '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_round_trips_through_its_name() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("auditor".parse::<Role>().is_err());
    }

    #[test]
    fn only_super_admin_bypasses() {
        let bypass: Vec<Role> = Role::ALL.into_iter().filter(Role::is_bypass).collect();
        assert_eq!(bypass, vec![Role::SuperAdmin]);
    }

    #[test]
    fn default_tables_have_no_duplicates() {
        for role in Role::ALL {
            let perms = role.default_permissions();
            let mut unique = perms.to_vec();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), perms.len(), "duplicate permission for {role}");
        }
    }

    #[test]
    fn viewer_can_only_view() {
        assert_eq!(Role::Viewer.default_permissions(), &[VIEW_DOCUMENTS]);
        assert!(Role::User.default_permissions().contains(&EDIT_OWN_DOCUMENTS));
        assert!(!Role::Admin.default_permissions().contains(&DELETE_DOCUMENTS));
    }
}
