//! Role DDL generation
//!
//! Role statements cannot take bind parameters, so every name and password is
//! interpolated through [`quote_identifier`] / [`quote_literal`]. Callers
//! validate names with [`validate_role_name`](crate::security::validate_role_name)
//! before any of these are built.
//!
//! Statements that must commit together are joined with [`batch`] and sent
//! as one simple-query message.

use crate::security::{quote_identifier, quote_literal};

/// Object classes covered by default privileges
const DEFAULT_PRIVILEGE_OBJECTS: [&str; 4] = ["TABLES", "SEQUENCES", "FUNCTIONS", "TYPES"];

/// Join statements into one simple-query message
pub fn batch(statements: &[String]) -> String {
    statements.join(";\n")
}

/// `CREATE ROLE <owner> WITH NOLOGIN`
pub fn create_owner_role(owner: &str) -> String {
    format!("CREATE ROLE {} WITH NOLOGIN", quote_identifier(owner))
}

/// Let the owner role create schemas in the database
pub fn grant_database(database: &str, role: &str) -> String {
    format!(
        "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
        quote_identifier(database),
        quote_identifier(role)
    )
}

/// Inverse of [`grant_database`]
pub fn revoke_database(database: &str, role: &str) -> String {
    format!(
        "REVOKE ALL PRIVILEGES ON DATABASE {} FROM {}",
        quote_identifier(database),
        quote_identifier(role)
    )
}

/// `GRANT <role> TO <member>`
pub fn grant_role(role: &str, member: &str) -> String {
    format!(
        "GRANT {} TO {}",
        quote_identifier(role),
        quote_identifier(member)
    )
}

/// `GRANT <role> TO CURRENT_USER`
pub fn grant_role_to_current_user(role: &str) -> String {
    format!("GRANT {} TO CURRENT_USER", quote_identifier(role))
}

/// `REVOKE <role> FROM <member>`
pub fn revoke_role(role: &str, member: &str) -> String {
    format!(
        "REVOKE {} FROM {}",
        quote_identifier(role),
        quote_identifier(member)
    )
}

/// Inheriting login role that is a direct member of `owner`
pub fn create_login_role(username: &str, password: &str, owner: &str) -> String {
    format!(
        "CREATE ROLE {} WITH LOGIN INHERIT PASSWORD {} IN ROLE {}",
        quote_identifier(username),
        quote_literal(password),
        quote_identifier(owner)
    )
}

/// Sessions of `username` act as `owner` from login onwards
pub fn set_session_role(username: &str, owner: &str) -> String {
    format!(
        "ALTER ROLE {} SET role TO {}",
        quote_identifier(username),
        quote_literal(owner)
    )
}

/// `ALTER ROLE <username> WITH PASSWORD '...'`
pub fn set_password(username: &str, password: &str) -> String {
    format!(
        "ALTER ROLE {} WITH PASSWORD {}",
        quote_identifier(username),
        quote_literal(password)
    )
}

/// Objects `username` creates as itself are granted to `owner`
pub fn default_privileges(username: &str, owner: &str) -> Vec<String> {
    let user = quote_identifier(username);
    let owner = quote_identifier(owner);
    DEFAULT_PRIVILEGE_OBJECTS
        .iter()
        .map(|objects| {
            format!("ALTER DEFAULT PRIVILEGES FOR ROLE {user} GRANT ALL ON {objects} TO {owner}")
        })
        .collect()
}

/// `REASSIGN OWNED BY <username> TO <owner>`
pub fn reassign_owned(username: &str, owner: &str) -> String {
    format!(
        "REASSIGN OWNED BY {} TO {}",
        quote_identifier(username),
        quote_identifier(owner)
    )
}

/// `DROP OWNED BY <username>`; only privileges remain once ownership moved
pub fn drop_owned(username: &str) -> String {
    format!("DROP OWNED BY {}", quote_identifier(username))
}

/// `DROP ROLE <role>`
pub fn drop_role(role: &str) -> String {
    format!("DROP ROLE {}", quote_identifier(role))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_login_role() {
        assert_eq!(
            create_login_role("u1", "p'w", "app_owner"),
            "CREATE ROLE \"u1\" WITH LOGIN INHERIT PASSWORD 'p''w' IN ROLE \"app_owner\""
        );
    }

    #[test]
    fn test_session_role_uses_literal() {
        assert_eq!(
            set_session_role("u1", "Owner\"X"),
            "ALTER ROLE \"u1\" SET role TO 'Owner\"X'"
        );
    }

    #[test]
    fn test_default_privileges_cover_object_classes() {
        let statements = default_privileges("u1", "o");
        assert_eq!(statements.len(), 4);
        assert_eq!(
            statements[0],
            "ALTER DEFAULT PRIVILEGES FOR ROLE \"u1\" GRANT ALL ON TABLES TO \"o\""
        );
        assert!(statements[3].ends_with("ON TYPES TO \"o\""));
    }

    #[test]
    fn test_batch_joins_statements() {
        let sql = batch(&[drop_owned("u1"), drop_role("u1")]);
        assert_eq!(sql, "DROP OWNED BY \"u1\";\nDROP ROLE \"u1\"");
    }

    #[test]
    fn test_hyphenated_names_are_quoted() {
        assert_eq!(
            grant_role("owner", "4f1c-9b2e"),
            "GRANT \"owner\" TO \"4f1c-9b2e\""
        );
    }
}
