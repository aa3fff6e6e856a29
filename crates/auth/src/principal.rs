use serde::{Deserialize, Serialize};

use lendstock_core::UserId;

use crate::{Permission, Role, policy::role_permissions};

/// A fully resolved principal for authorization decisions.
///
/// Construction is decoupled from storage and transport: API layers can
/// derive roles from whatever session mechanism they use and resolve the
/// permission set here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    pub fn new(user_id: UserId, roles: Vec<Role>, permissions: Vec<Permission>) -> Self {
        Self {
            user_id,
            roles,
            permissions,
        }
    }

    /// Resolve a principal from role names using the default policy.
    pub fn with_roles<I, S>(user_id: UserId, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<std::borrow::Cow<'static, str>>,
    {
        let roles: Vec<Role> = roles.into_iter().map(Role::new).collect();
        let permissions = roles
            .iter()
            .flat_map(|r| role_permissions(r.as_str()))
            .collect();
        Self {
            user_id,
            roles,
            permissions,
        }
    }
}
