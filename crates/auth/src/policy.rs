//! Default role → permission policy for the lending platform.

use crate::Permission;
use crate::permissions::known;

/// Permissions granted by a role name.
///
/// Unknown roles grant nothing. The mapping is deliberately small: employees
/// borrow and return, keepers run stock and the approval queue, couriers move
/// stock between stores, managers audit activity, admins do everything.
pub fn role_permissions(role: &str) -> Vec<Permission> {
    match role {
        "admin" => vec![Permission::new("*")],
        "manager" => vec![
            known::audit_read(),
            known::lending_approve(),
            known::lending_return(),
        ],
        "keeper" => vec![
            known::lending_approve(),
            known::lending_return(),
            known::stock_manage(),
        ],
        "courier" => vec![known::stock_transfer()],
        "employee" => vec![known::lending_request(), known::lending_return()],
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeper_can_approve_but_not_transfer() {
        let perms = role_permissions("keeper");
        assert!(perms.contains(&known::lending_approve()));
        assert!(!perms.contains(&known::stock_transfer()));
    }

    #[test]
    fn unknown_role_grants_nothing() {
        assert!(role_permissions("intern").is_empty());
    }
}
