//! Secure connection factory and the SQL session seam
//!
//! Everything above this module talks to the database through [`SqlSession`],
//! which only needs two operations:
//! - `batch_execute`: one or more `;`-separated statements in a single
//!   simple-query message. PostgreSQL runs such a message as one implicit
//!   transaction, so the whole batch commits or none of it does.
//! - `query`: a parameterised query whose parameters are bound as text.
//!
//! [`PgConnectionFactory`] produces [`PgSession`]s over verified TLS.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::types::{ToSql, Type};
use tracing::{debug, warn};

use crate::error::{classify_sql_state, ConnectionError, SqlError, SqlStateKind};
use crate::tls::{self, ClientIdentity, SslMode, TlsMaterials};
use crate::types::{Row, SensitiveString, Value};

/// Default bound on connection establishment
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default application name reported to the server
pub const DEFAULT_APPLICATION_NAME: &str = "pgbind";

/// Generic SQL execution interface used by every provisioning component
#[async_trait]
pub trait SqlSession: Send + Sync {
    /// Execute one or more `;`-separated statements as a single atomic unit
    async fn batch_execute(&self, sql: &str) -> Result<(), SqlError>;

    /// Run a query with text parameters (`$1`, `$2`, ...)
    async fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<Row>, SqlError>;

    /// Run a query expected to return at most one row
    async fn query_opt(&self, sql: &str, params: &[&str]) -> Result<Option<Row>, SqlError> {
        let mut rows = self.query(sql, params).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(SqlError::protocol(format!(
                "expected at most one row, got {n}"
            ))),
        }
    }

    /// Run a query expected to return exactly one row
    async fn query_one(&self, sql: &str, params: &[&str]) -> Result<Row, SqlError> {
        self.query_opt(sql, params)
            .await?
            .ok_or_else(|| SqlError::protocol("expected one row, got none"))
    }
}

#[async_trait]
impl<T: SqlSession + ?Sized> SqlSession for std::sync::Arc<T> {
    async fn batch_execute(&self, sql: &str) -> Result<(), SqlError> {
        (**self).batch_execute(sql).await
    }

    async fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<Row>, SqlError> {
        (**self).query(sql, params).await
    }
}

/// Produces sessions from connection parameters
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Session type produced by this factory
    type Session: SqlSession + 'static;

    /// Open a new session
    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Session, ConnectionError>;
}

// ============================================================================
// Connection parameters
// ============================================================================

/// Identity materials and connection parameters for the admin principal
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or IP address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database to connect to
    pub database: String,
    /// Admin principal
    pub username: String,
    /// Password, when password authentication is used
    pub password: Option<SensitiveString>,
    /// Server verification mode
    pub ssl_mode: SslMode,
    /// Root CA and optional client identity
    pub tls: TlsMaterials,
    /// Bound on connection establishment
    pub connect_timeout: Duration,
    /// Server-side statement timeout for the session
    pub statement_timeout: Option<Duration>,
    /// Application name (shown in pg_stat_activity)
    pub application_name: Option<String>,
}

impl ConnectionConfig {
    /// Create configuration for `username@host:port/database`
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: None,
            ssl_mode: SslMode::default(),
            tls: TlsMaterials::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            statement_timeout: None,
            application_name: Some(DEFAULT_APPLICATION_NAME.into()),
        }
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<SensitiveString>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the verification mode
    pub fn with_ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Set the root CA (inline PEM or file path)
    pub fn with_root_ca(mut self, root_ca: &str) -> Self {
        self.tls.root_ca = Some(tls::CertificateSource::detect(root_ca));
        self
    }

    /// Set the client certificate and key (inline PEM or file paths)
    pub fn with_client_identity(mut self, certificate: &str, private_key: &str) -> Self {
        self.tls.client_identity = Some(ClientIdentity {
            certificate: tls::CertificateSource::detect(certificate),
            private_key: tls::PrivateKeySource::detect(private_key),
        });
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the server-side statement timeout
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Set the application name
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Validate parameters that do not require touching the network
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.host.trim().is_empty() {
            return Err(ConnectionError::configuration("host is required"));
        }
        if self.port == 0 {
            return Err(ConnectionError::configuration("port must be non-zero"));
        }
        if self.database.is_empty() {
            return Err(ConnectionError::configuration("database is required"));
        }
        if self.username.is_empty() {
            return Err(ConnectionError::configuration("username is required"));
        }
        if self.password.is_none() && self.tls.client_identity.is_none() {
            return Err(ConnectionError::configuration(
                "either a password or a client certificate is required",
            ));
        }
        self.tls.validate(self.ssl_mode)?;
        Ok(())
    }

    fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.username)
            .connect_timeout(self.connect_timeout)
            .ssl_mode(tokio_postgres::config::SslMode::Require);
        if let Some(password) = &self.password {
            pg.password(password.expose_secret());
        }
        if let Some(name) = &self.application_name {
            pg.application_name(name);
        }
        if let Some(timeout) = self.statement_timeout {
            pg.options(&format!("-c statement_timeout={}", timeout.as_millis()));
        }
        pg
    }
}

// ============================================================================
// PostgreSQL implementation
// ============================================================================

/// Factory for verified-TLS PostgreSQL sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnectionFactory;

impl PgConnectionFactory {
    /// Create a new factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionFactory for PgConnectionFactory {
    type Session = PgSession;

    async fn connect(&self, config: &ConnectionConfig) -> Result<PgSession, ConnectionError> {
        config.validate()?;
        let tls = tls::make_tls_connector(config.ssl_mode, &config.tls)?;

        debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            user = %config.username,
            ssl_mode = %config.ssl_mode,
            "Connecting to PostgreSQL"
        );

        let pg_config = config.to_pg_config();
        let connecting = pg_config.connect(tls);
        let (client, connection) =
            match tokio::time::timeout(config.connect_timeout, connecting).await {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => return Err(classify_connect_error(e)),
                Err(_) => {
                    return Err(ConnectionError::timeout(format!(
                        "no connection to {}:{} within {:?}",
                        config.host, config.port, config.connect_timeout
                    )))
                }
            };

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        Ok(PgSession { client, driver })
    }
}

/// Sort a connect failure into network, timeout, TLS or authentication.
fn classify_connect_error(err: tokio_postgres::Error) -> ConnectionError {
    if let Some(db) = err.as_db_error() {
        let message = db.message().to_string();
        return match classify_sql_state(db.code().code()) {
            SqlStateKind::Authentication | SqlStateKind::PermissionDenied => {
                ConnectionError::authentication(message)
            }
            _ => ConnectionError::network(message),
        };
    }

    let mut cause = err.source();
    while let Some(current) = cause {
        if current.downcast_ref::<rustls::Error>().is_some() {
            return ConnectionError::tls(err.to_string());
        }
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            let inner_is_tls = io_err
                .get_ref()
                .is_some_and(|inner| inner.downcast_ref::<rustls::Error>().is_some());
            if inner_is_tls {
                return ConnectionError::tls(format!("{}: {}", err, io_err));
            }
            if io_err.kind() == io::ErrorKind::TimedOut {
                return ConnectionError::timeout(err.to_string());
            }
        }
        cause = current.source();
    }

    let message = err.to_string();
    if message.contains("TLS") {
        return ConnectionError::tls(message);
    }
    if message.contains("timeout") || message.contains("timed out") {
        return ConnectionError::timeout(message);
    }
    ConnectionError::network_with_source(message, err)
}

/// A live session. Dropping it stops the connection driver, which closes the
/// socket; the server rolls back anything still in flight.
pub struct PgSession {
    client: tokio_postgres::Client,
    driver: JoinHandle<()>,
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession")
            .field("closed", &self.client.is_closed())
            .finish()
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl SqlSession for PgSession {
    async fn batch_execute(&self, sql: &str) -> Result<(), SqlError> {
        self.client.batch_execute(sql).await.map_err(sql_error)
    }

    async fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<Row>, SqlError> {
        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self.client.query(sql, &params).await.map_err(sql_error)?;
        rows.iter().map(pg_row_to_row).collect()
    }
}

fn sql_error(err: tokio_postgres::Error) -> SqlError {
    if let Some(db) = err.as_db_error() {
        return SqlError::server(db.code().code(), db.message());
    }
    let io_failure = err
        .source()
        .is_some_and(|cause| cause.downcast_ref::<io::Error>().is_some());
    if err.is_closed() || io_failure {
        return SqlError::connection_lost(err.to_string());
    }
    SqlError::protocol(err.to_string())
}

fn pg_row_to_row(row: &tokio_postgres::Row) -> Result<Row, SqlError> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(pg_value(row, idx, column.type_())?);
    }
    Ok(Row::new(columns, values))
}

fn pg_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Result<Value, SqlError> {
    let decode = |e: tokio_postgres::Error| {
        SqlError::protocol(format!("cannot decode column {idx} of type {ty}: {e}"))
    };
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)
            .map_err(decode)?
            .map(Value::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)
            .map_err(decode)?
            .map(|n| Value::Int(n.into()))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)
            .map_err(decode)?
            .map(|n| Value::Int(n.into()))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)
            .map_err(decode)?
            .map(Value::Int)
    } else if [Type::TEXT_ARRAY, Type::NAME_ARRAY, Type::VARCHAR_ARRAY].contains(ty) {
        row.try_get::<_, Option<Vec<String>>>(idx)
            .map_err(decode)?
            .map(Value::TextArray)
    } else {
        row.try_get::<_, Option<String>>(idx)
            .map_err(decode)?
            .map(Value::Text)
    };
    Ok(value.unwrap_or(Value::Null))
}
