//! Archive error model.

use thiserror::Error;

/// Result type used across the archive crates.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Error taxonomy shared by identity, permission and document operations.
///
/// Unknown identifiers and wrong secrets both map to [`ArchiveError::InvalidCredentials`]
/// so the rendered message never reveals which one happened.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Carries the human-readable unlock time.
    #[error("account is locked until {0}")]
    AccountLocked(String),

    /// Carries a status-specific message (inactive, suspended, on leave).
    #[error("{0}")]
    AccountNotActive(String),

    #[error("password does not meet policy: {0}")]
    PasswordTooWeak(String),

    #[error("password was used recently and cannot be reused")]
    PasswordReused,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("document was already reviewed by another reviewer")]
    AlreadyReviewed,

    #[error("document was already approved by another approver")]
    AlreadyApproved,

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("record not found")]
    RecordNotFound,

    #[error("reset token is invalid or has expired")]
    TokenExpiredOrInvalid,

    #[error("session is invalid or has expired")]
    SessionInvalid,

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("transaction failed: {0}")]
    TransactionFailure(String),

    /// Malformed input (missing fields, mismatched confirmation, empty change set).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A fault inside the archive itself (hashing backend, key setup), never caused by input.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ArchiveError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn weak_password(msg: impl Into<String>) -> Self {
        Self::PasswordTooWeak(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageFailure(msg.into())
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::TransactionFailure(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn not_found() -> Self {
        Self::RecordNotFound
    }

    /// Stable snake_case name, used as the audit detail for failed operations.
    pub fn kind(&self) -> &'static str {
        match self {
            ArchiveError::InvalidCredentials => "invalid_credentials",
            ArchiveError::AccountLocked(_) => "account_locked",
            ArchiveError::AccountNotActive(_) => "account_not_active",
            ArchiveError::PasswordTooWeak(_) => "password_too_weak",
            ArchiveError::PasswordReused => "password_reused",
            ArchiveError::PermissionDenied(_) => "permission_denied",
            ArchiveError::AlreadyReviewed => "already_reviewed",
            ArchiveError::AlreadyApproved => "already_approved",
            ArchiveError::InvalidTransition(_) => "invalid_transition",
            ArchiveError::RecordNotFound => "record_not_found",
            ArchiveError::TokenExpiredOrInvalid => "token_expired_or_invalid",
            ArchiveError::SessionInvalid => "session_invalid",
            ArchiveError::StorageFailure(_) => "storage_failure",
            ArchiveError::TransactionFailure(_) => "transaction_failure",
            ArchiveError::Validation(_) => "validation",
            ArchiveError::InvalidId(_) => "invalid_id",
            ArchiveError::Internal(_) => "internal",
        }
    }
}
