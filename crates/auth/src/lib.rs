//! `lendstock-auth` — pure authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP, sessions, and storage:
//! callers resolve a [`Principal`] however they authenticate, and the gateway
//! checks permissions before any command is dispatched.

pub mod authorize;
pub mod permissions;
pub mod policy;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, authorize};
pub use permissions::Permission;
pub use policy::role_permissions;
pub use principal::Principal;
pub use roles::Role;
