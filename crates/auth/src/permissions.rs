use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are modeled as opaque strings (e.g. "lending.approve").
/// A special wildcard permission `"*"` can be used by policy layers to
/// indicate "allow all" without hardcoding domain permissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permissions checked by the lending gateway.
pub mod known {
    use super::Permission;

    pub fn lending_request() -> Permission {
        Permission::new("lending.request")
    }

    pub fn lending_approve() -> Permission {
        Permission::new("lending.approve")
    }

    pub fn lending_return() -> Permission {
        Permission::new("lending.return")
    }

    pub fn stock_manage() -> Permission {
        Permission::new("stock.manage")
    }

    pub fn stock_transfer() -> Permission {
        Permission::new("stock.transfer")
    }

    pub fn audit_read() -> Permission {
        Permission::new("audit.read")
    }
}
