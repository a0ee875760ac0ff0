//! Quoting and validation for role names and passwords.
//!
//! PostgreSQL role DDL (`CREATE ROLE`, `GRANT`, `ALTER DEFAULT PRIVILEGES`,
//! `REASSIGN OWNED`) cannot take bind parameters, so every role name and
//! password that reaches a statement goes through this module:
//! - [`validate_role_name`] rejects names the server would truncate or refuse
//! - [`quote_identifier`] produces a double-quoted identifier
//! - [`quote_literal`] produces a single-quoted string literal
//!
//! Role names are deliberately permissive (orchestrators commonly use UUIDs
//! with hyphens); safety comes from quoting, not from a character allow-list.

use thiserror::Error;

/// Maximum identifier length accepted by PostgreSQL (`NAMEDATALEN - 1`).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A role name that cannot be used as a PostgreSQL identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Empty name
    #[error("role name cannot be empty")]
    Empty,
    /// Longer than [`MAX_IDENTIFIER_LEN`] bytes; the server would silently truncate it
    #[error("role name {name:?} too long: {len} bytes (max {MAX_IDENTIFIER_LEN})")]
    TooLong {
        /// Offending name
        name: String,
        /// Length in bytes
        len: usize,
    },
    /// Contains a NUL byte
    #[error("role name {name:?} contains a NUL byte")]
    Nul {
        /// Offending name
        name: String,
    },
}

/// Validate a role name before it is quoted into DDL.
///
/// # Examples
///
/// ```
/// use pgbind_core::security::validate_role_name;
///
/// assert!(validate_role_name("app_owner").is_ok());
/// assert!(validate_role_name("0f6c3b8e-2d4a-4c1e-9a57-7d0e2f9b1c33").is_ok());
///
/// assert!(validate_role_name("").is_err());
/// assert!(validate_role_name(&"x".repeat(64)).is_err());
/// ```
pub fn validate_role_name(name: &str) -> Result<(), IdentifierError> {
    if name.is_empty() {
        return Err(IdentifierError::Empty);
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(IdentifierError::TooLong {
            name: name.to_string(),
            len: name.len(),
        });
    }
    if name.contains('\0') {
        return Err(IdentifierError::Nul {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Quote an identifier for interpolation into SQL.
///
/// Wraps in double quotes and doubles any embedded double quote. Call
/// [`validate_role_name`] first; this function does not reject anything.
///
/// # Examples
///
/// ```
/// use pgbind_core::security::quote_identifier;
///
/// assert_eq!(quote_identifier("app_owner"), "\"app_owner\"");
/// assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
/// ```
pub fn quote_identifier(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for c in name.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Quote a string value as a SQL literal.
///
/// Embedded single quotes are doubled. When the value contains a backslash the
/// escape-string form ` E'...'` is used with doubled backslashes, so the result
/// is correct whatever `standard_conforming_strings` is set to.
///
/// # Examples
///
/// ```
/// use pgbind_core::security::quote_literal;
///
/// assert_eq!(quote_literal("secret"), "'secret'");
/// assert_eq!(quote_literal("it's"), "'it''s'");
/// assert_eq!(quote_literal(r"a\b"), r" E'a\\b'");
/// ```
pub fn quote_literal(value: &str) -> String {
    let has_backslash = value.contains('\\');
    let mut quoted = String::with_capacity(value.len() + 4);
    if has_backslash {
        quoted.push_str(" E");
    }
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Reject passwords PostgreSQL would not store as given.
pub(crate) fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.is_empty() {
        return Err("password cannot be empty");
    }
    if password.contains('\0') {
        return Err("password contains a NUL byte");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // validate_role_name
    // -----------------------------------------------------------------------

    #[test]
    fn test_valid_role_names() {
        assert!(validate_role_name("binding_group").is_ok());
        assert!(validate_role_name("Mixed Case").is_ok());
        assert!(validate_role_name("9e1d6b5c-3a5f-4f8e-8f43-0b7a8f0c1d2e").is_ok());
        assert!(validate_role_name(&"a".repeat(MAX_IDENTIFIER_LEN)).is_ok());
    }

    #[test]
    fn test_empty_role_name() {
        assert_eq!(validate_role_name(""), Err(IdentifierError::Empty));
    }

    #[test]
    fn test_too_long_role_name() {
        let name = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(matches!(
            validate_role_name(&name),
            Err(IdentifierError::TooLong { len: 64, .. })
        ));
    }

    #[test]
    fn test_length_counts_bytes() {
        // 32 two-byte characters: 64 bytes
        let name = "é".repeat(32);
        assert!(validate_role_name(&name).is_err());
    }

    #[test]
    fn test_nul_rejected() {
        assert!(matches!(
            validate_role_name("a\0b"),
            Err(IdentifierError::Nul { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // quote_identifier
    // -----------------------------------------------------------------------

    #[test]
    fn test_quote_plain_identifier() {
        assert_eq!(quote_identifier("u1"), "\"u1\"");
    }

    #[test]
    fn test_quote_identifier_injection() {
        assert_eq!(
            quote_identifier("x\"; DROP ROLE admin; --"),
            "\"x\"\"; DROP ROLE admin; --\""
        );
    }

    // -----------------------------------------------------------------------
    // quote_literal
    // -----------------------------------------------------------------------

    #[test]
    fn test_quote_literal_plain() {
        assert_eq!(quote_literal("p@ss w0rd"), "'p@ss w0rd'");
    }

    #[test]
    fn test_quote_literal_quotes() {
        assert_eq!(quote_literal("x'; DROP ROLE u--"), "'x''; DROP ROLE u--'");
    }

    #[test]
    fn test_quote_literal_backslash() {
        assert_eq!(quote_literal(r"\'"), r" E'\\'''");
    }

    #[test]
    fn test_password_validation() {
        assert!(validate_password("secret").is_ok());
        assert!(validate_password("").is_err());
        assert!(validate_password("a\0").is_err());
    }
}
