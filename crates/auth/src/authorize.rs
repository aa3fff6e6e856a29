use std::collections::HashSet;

use thiserror::Error;

use crate::{Permission, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Authorize a principal for one permission.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let perms: HashSet<&str> = principal.permissions.iter().map(|p| p.as_str()).collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::known;
    use lendstock_core::UserId;

    #[test]
    fn employee_may_request_but_not_approve() {
        let principal = Principal::with_roles(UserId::new(), ["employee"]);

        assert!(authorize(&principal, &known::lending_request()).is_ok());
        let err = authorize(&principal, &known::lending_approve()).unwrap_err();
        assert!(matches!(err, AuthzError::Forbidden(_)));
    }

    #[test]
    fn wildcard_grants_everything() {
        let principal = Principal::with_roles(UserId::new(), ["admin"]);
        assert!(authorize(&principal, &known::stock_transfer()).is_ok());
        assert!(authorize(&principal, &known::audit_read()).is_ok());
    }
}
