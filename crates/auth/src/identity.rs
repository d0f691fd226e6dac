use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use archive_core::{DepartmentId, IdentityId};

use crate::roles::Role;

/// Account status. Only active and on-leave accounts can sign in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    Active,
    Inactive,
    Suspended,
    OnLeave,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Active => "active",
            IdentityStatus::Inactive => "inactive",
            IdentityStatus::Suspended => "suspended",
            IdentityStatus::OnLeave => "on_leave",
        }
    }

    pub fn can_authenticate(&self) -> bool {
        matches!(self, IdentityStatus::Active | IdentityStatus::OnLeave)
    }

    /// Message shown when sign-in is refused because of the status.
    pub fn refusal_message(&self) -> &'static str {
        match self {
            IdentityStatus::Active | IdentityStatus::OnLeave => "account is active",
            IdentityStatus::Inactive => "account is inactive, contact your administrator",
            IdentityStatus::Suspended => "account is suspended, contact your administrator",
        }
    }
}

/// A person who can authenticate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub username: String,
    pub email: String,
    pub employee_id: Option<String>,
    pub full_name: String,
    pub password_hash: String,
    pub password_changed_at: DateTime<Utc>,
    pub role: Role,
    pub department_id: Option<DepartmentId>,
    pub status: IdentityStatus,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<IdentityId>,
}

impl Identity {
    /// Username, email (case-insensitive) or employee id.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        self.username == identifier
            || self.email.eq_ignore_ascii_case(identifier)
            || self.employee_id.as_deref() == Some(identifier)
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    pub fn same_department(&self, other: &Identity) -> bool {
        self.department_id.is_some() && self.department_id == other.department_id
    }
}

impl core::fmt::Debug for Identity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("department_id", &self.department_id)
            .field("status", &self.status)
            .field("failed_attempts", &self.failed_attempts)
            .field("locked_until", &self.locked_until)
            .finish_non_exhaustive()
    }
}

/// Input for provisioning an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub employee_id: Option<String>,
    pub full_name: String,
    pub password: String,
    pub role: Role,
    pub department_id: Option<DepartmentId>,
}

/// Authorization-relevant profile changes. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityUpdate {
    pub full_name: Option<String>,
    pub department_id: Option<Option<DepartmentId>>,
    pub role: Option<Role>,
    pub status: Option<IdentityStatus>,
}

impl IdentityUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.department_id.is_none()
            && self.role.is_none()
            && self.status.is_none()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::identity;
    use super::*;
    use chrono::Duration;

    #[test]
    fn matches_any_identifier_form() {
        let user = identity(3, Role::User, None);
        assert!(user.matches_identifier("user3"));
        assert!(user.matches_identifier("USER3@archive.test"));
        assert!(user.matches_identifier("EMP-0003"));
        assert!(!user.matches_identifier("User3"));
    }

    #[test]
    fn lock_is_only_active_in_the_future() {
        let now = Utc::now();
        let mut user = identity(1, Role::User, None);
        user.locked_until = Some(now + Duration::minutes(1));
        assert!(user.is_locked(now));
        assert!(!user.is_locked(now + Duration::minutes(1)));
    }

    #[test]
    fn only_active_and_on_leave_authenticate() {
        assert!(IdentityStatus::Active.can_authenticate());
        assert!(IdentityStatus::OnLeave.can_authenticate());
        assert!(!IdentityStatus::Inactive.can_authenticate());
        assert!(!IdentityStatus::Suspended.can_authenticate());
    }

    #[test]
    fn debug_output_omits_password_hash() {
        let mut user = identity(1, Role::User, None);
        user.password_hash = "$argon2id$secret".into();
        assert!(!format!("{user:?}").contains("argon2id"));
    }
}
