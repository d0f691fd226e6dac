//! `archive-auth`: identities, credentials, sessions and permission resolution.
//!
//! Storage and transport are behind traits; this crate only owns the rules.

pub mod config;
pub mod context;
pub mod credentials;
pub mod identity;
pub mod lockout;
pub mod manager;
pub mod permissions;
pub mod resolver;
pub mod roles;
pub mod session;
pub mod store;
pub mod tokens;

pub use config::{AuthConfig, HashingSettings, LockoutSettings, PasswordSettings, SessionSettings};
pub use context::RequestContext;
pub use credentials::CredentialVault;
pub use identity::{Identity, IdentityStatus, IdentityUpdate, NewIdentity};
pub use lockout::{FailureOutcome, LockoutPolicy};
pub use manager::{AuthOutcome, AuthenticatedSession, IdentityManager, LoginRequest, RESET_REQUEST_ACK};
pub use permissions::{Permission, ResourceRef, names};
pub use resolver::{AuthorizationExplanation, PermissionResolver, role_can_edit};
pub use roles::Role;
pub use session::{InMemorySessionStore, Session, SessionId, SessionSealer, SessionStore};
pub use store::{IdentityStore, InMemoryIdentityStore, PermissionGrant};
