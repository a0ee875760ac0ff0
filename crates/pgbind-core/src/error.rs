//! Error types for pgbind-core
//!
//! Each lifecycle operation has its own error enum so callers can match on
//! exactly the failures that operation can produce:
//! - [`ConnectionError`]: establishing the admin session
//! - [`ProvisionError`]: owner-role registration and binding-user reconciliation
//! - [`TeardownError`]: dropping a binding user
//! - [`ConfigError`]: loading and validating provider configuration
//!
//! All of them expose a [`category()`](Error::category) and `is_retriable()`
//! so an orchestrator can decide whether to retry without string matching.

use std::fmt;
use thiserror::Error;

use crate::security::IdentifierError;

/// Result type for pgbind-core operations that span several lifecycle steps
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-level failure (retriable)
    Connection,
    /// Connect or statement timeout (retriable)
    Timeout,
    /// TLS handshake or certificate verification failure
    Tls,
    /// Server rejected the credentials
    Authentication,
    /// Invalid configuration or identity material
    Configuration,
    /// Admin principal lacks a required privilege
    Permission,
    /// Name already taken by an incompatible role
    NameCollision,
    /// Role still has login members or owns objects
    InUse,
    /// Objects block dropping a role
    DependentObjects,
    /// Operation refused to protect a role
    Protected,
    /// Any other statement failure
    Query,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Tls => "tls",
            Self::Authentication => "authentication",
            Self::Configuration => "configuration",
            Self::Permission => "permission",
            Self::NameCollision => "name_collision",
            Self::InUse => "in_use",
            Self::DependentObjects => "dependent_objects",
            Self::Protected => "protected",
            Self::Query => "query",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// SQLSTATE classification
// ============================================================================

/// Coarse meaning of a PostgreSQL SQLSTATE code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlStateKind {
    /// `42501` insufficient_privilege
    PermissionDenied,
    /// `42710` duplicate_object, `23505` unique_violation
    Duplicate,
    /// `42704` undefined_object (e.g. role does not exist)
    UndefinedObject,
    /// `2BP01` dependent_objects_still_exist
    DependentObjects,
    /// `28000` invalid_authorization_specification, `28P01` invalid_password
    Authentication,
    /// Class `08` connection exceptions
    Connection,
    /// `57014` query_canceled (statement_timeout or cancel request)
    Cancelled,
    /// Anything else
    Other,
}

/// Classify a five-character SQLSTATE code.
pub fn classify_sql_state(code: &str) -> SqlStateKind {
    match code {
        "42501" => SqlStateKind::PermissionDenied,
        "42710" | "23505" => SqlStateKind::Duplicate,
        "42704" => SqlStateKind::UndefinedObject,
        "2BP01" => SqlStateKind::DependentObjects,
        "28000" | "28P01" => SqlStateKind::Authentication,
        "57014" => SqlStateKind::Cancelled,
        c if c.starts_with("08") => SqlStateKind::Connection,
        _ => SqlStateKind::Other,
    }
}

/// A failed statement as reported by a [`SqlSession`](crate::SqlSession).
///
/// Never carries the statement text: provisioning statements embed passwords.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SqlError {
    /// SQLSTATE reported by the server, if the server answered at all
    pub code: Option<String>,
    /// Server or driver message
    pub message: String,
    /// The session is gone (socket closed, driver stopped)
    pub connection_lost: bool,
}

impl SqlError {
    /// Error reported by the server with a SQLSTATE code
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            connection_lost: false,
        }
    }

    /// The session was lost before the server answered
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            connection_lost: true,
        }
    }

    /// Client-side failure (unexpected row shape, type mismatch)
    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            connection_lost: false,
        }
    }

    /// Classified SQLSTATE
    pub fn kind(&self) -> SqlStateKind {
        if self.connection_lost {
            return SqlStateKind::Connection;
        }
        self.code
            .as_deref()
            .map(classify_sql_state)
            .unwrap_or(SqlStateKind::Other)
    }
}

// ============================================================================
// Connection errors
// ============================================================================

/// Failure to establish (or keep) the admin session
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ConnectionError {
    /// Socket-level failure or lost session
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connect or statement timeout
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// TLS handshake or certificate verification failed
    #[error("tls error: {message}")]
    Tls { message: String },

    /// Server rejected the principal or its credentials
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// Bad connection parameters or identity material
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl ConnectionError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } => ErrorCategory::Connection,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Tls { .. } => ErrorCategory::Tls,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a TLS error
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Map a session-level statement failure that is really a transport failure
    fn from_sql(err: &SqlError) -> Option<Self> {
        match err.kind() {
            SqlStateKind::Connection => Some(Self::network(err.message.clone())),
            SqlStateKind::Cancelled => Some(Self::timeout(err.message.clone())),
            SqlStateKind::Authentication => Some(Self::authentication(err.message.clone())),
            _ => None,
        }
    }
}

// ============================================================================
// Provision errors
// ============================================================================

/// Failure of owner-role registration or binding-user reconciliation
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ProvisionError {
    /// The admin principal lacks a required privilege
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// The name is taken by a role of an incompatible kind
    #[error("role {name:?} cannot be used: {reason}")]
    NameCollision { name: String, reason: String },

    /// The owner role still has login members or owns objects
    #[error("role {role:?} is still in use: {reason}")]
    InUse { role: String, reason: String },

    /// Role name rejected before reaching the server
    #[error(transparent)]
    InvalidName(#[from] IdentifierError),

    /// Password rejected before reaching the server
    #[error("invalid password: {reason}")]
    InvalidPassword { reason: String },

    /// Any other statement failure
    #[error("query error: {message}")]
    Query {
        message: String,
        code: Option<String>,
    },

    /// The admin session failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl ProvisionError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PermissionDenied { .. } => ErrorCategory::Permission,
            Self::NameCollision { .. } => ErrorCategory::NameCollision,
            Self::InUse { .. } => ErrorCategory::InUse,
            Self::InvalidName(_) | Self::InvalidPassword { .. } => ErrorCategory::Configuration,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Connection(e) => e.category(),
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a name collision error
    pub fn name_collision(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NameCollision {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an in-use error
    pub fn in_use(role: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InUse {
            role: role.into(),
            reason: reason.into(),
        }
    }
}

impl From<SqlError> for ProvisionError {
    fn from(err: SqlError) -> Self {
        if let Some(conn) = ConnectionError::from_sql(&err) {
            return Self::Connection(conn);
        }
        match err.kind() {
            SqlStateKind::PermissionDenied => Self::PermissionDenied {
                message: err.message,
            },
            _ => Self::Query {
                message: err.message,
                code: err.code,
            },
        }
    }
}

// ============================================================================
// Teardown errors
// ============================================================================

/// Failure to drop a binding user
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum TeardownError {
    /// Objects that cannot be reassigned still depend on the role
    #[error("role {role:?} still has dependent objects: {message}")]
    DependentObjects { role: String, message: String },

    /// Refused to drop a role that is not a binding user
    #[error("refusing to drop role {role:?}: {reason}")]
    Protected { role: String, reason: String },

    /// The admin principal lacks a required privilege
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// Role name rejected before reaching the server
    #[error(transparent)]
    InvalidName(#[from] IdentifierError),

    /// Any other statement failure
    #[error("query error: {message}")]
    Query {
        message: String,
        code: Option<String>,
    },

    /// The admin session failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl TeardownError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DependentObjects { .. } => ErrorCategory::DependentObjects,
            Self::Protected { .. } => ErrorCategory::Protected,
            Self::PermissionDenied { .. } => ErrorCategory::Permission,
            Self::InvalidName(_) => ErrorCategory::Configuration,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Connection(e) => e.category(),
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a protected-role error
    pub fn protected(role: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protected {
            role: role.into(),
            reason: reason.into(),
        }
    }

    /// Map a statement failure while dropping `role`
    pub(crate) fn from_sql(role: &str, err: SqlError) -> Self {
        if let Some(conn) = ConnectionError::from_sql(&err) {
            return Self::Connection(conn);
        }
        match err.kind() {
            SqlStateKind::DependentObjects => Self::DependentObjects {
                role: role.to_string(),
                message: err.message,
            },
            SqlStateKind::PermissionDenied => Self::PermissionDenied {
                message: err.message,
            },
            _ => Self::Query {
                message: err.message,
                code: err.code,
            },
        }
    }
}

impl From<SqlError> for TeardownError {
    fn from(err: SqlError) -> Self {
        Self::from_sql("", err)
    }
}

// ============================================================================
// Configuration errors
// ============================================================================

/// Invalid provider configuration
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// YAML could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field failed validation
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create a validation error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

// ============================================================================
// Umbrella error
// ============================================================================

/// Any pgbind-core failure, for callers that drive several steps
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Connection could not be established
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Provisioning failed
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    /// Teardown failed
    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(e) => e.category(),
            Self::Connection(e) => e.category(),
            Self::Provision(e) => e.category(),
            Self::Teardown(e) => e.category(),
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_state_classification() {
        assert_eq!(classify_sql_state("42501"), SqlStateKind::PermissionDenied);
        assert_eq!(classify_sql_state("42710"), SqlStateKind::Duplicate);
        assert_eq!(classify_sql_state("23505"), SqlStateKind::Duplicate);
        assert_eq!(classify_sql_state("2BP01"), SqlStateKind::DependentObjects);
        assert_eq!(classify_sql_state("28P01"), SqlStateKind::Authentication);
        assert_eq!(classify_sql_state("28000"), SqlStateKind::Authentication);
        assert_eq!(classify_sql_state("08006"), SqlStateKind::Connection);
        assert_eq!(classify_sql_state("57014"), SqlStateKind::Cancelled);
        assert_eq!(classify_sql_state("42601"), SqlStateKind::Other);
    }

    #[test]
    fn test_retriable_categories() {
        assert!(ConnectionError::network("reset").is_retriable());
        assert!(ConnectionError::timeout("connect").is_retriable());
        assert!(!ConnectionError::tls("bad chain").is_retriable());
        assert!(!ConnectionError::authentication("bad password").is_retriable());
        assert!(!ProvisionError::name_collision("r", "nologin").is_retriable());
    }

    #[test]
    fn test_provision_error_from_sql() {
        let err: ProvisionError = SqlError::server("42501", "must have admin option").into();
        assert!(matches!(err, ProvisionError::PermissionDenied { .. }));

        let err: ProvisionError = SqlError::connection_lost("socket closed").into();
        assert!(matches!(
            err,
            ProvisionError::Connection(ConnectionError::Network { .. })
        ));
        assert!(err.is_retriable());

        let err: ProvisionError = SqlError::server("57014", "canceling statement").into();
        assert_eq!(err.category(), ErrorCategory::Timeout);

        let err: ProvisionError = SqlError::server("42601", "syntax error").into();
        match err {
            ProvisionError::Query { code, .. } => assert_eq!(code.as_deref(), Some("42601")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_teardown_error_from_sql() {
        let err = TeardownError::from_sql(
            "u1",
            SqlError::server("2BP01", "role cannot be dropped"),
        );
        match err {
            TeardownError::DependentObjects { role, .. } => assert_eq!(role, "u1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::NameCollision.to_string(), "name_collision");
        assert_eq!(ErrorCategory::Tls.to_string(), "tls");
    }
}
