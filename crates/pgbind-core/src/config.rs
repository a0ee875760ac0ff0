//! Provider configuration
//!
//! Loaded from YAML with `${VAR}` / `${VAR:-default}` expansion:
//!
//! ```yaml
//! host: db.internal
//! port: 5432
//! database: app
//! username: admin
//! password: ${PGBIND_ADMIN_PASSWORD}
//! data_owner_role: app_owner
//! sslmode: verify-ca
//! sslrootcert: /etc/pgbind/ca.crt
//! clientcert:
//!   cert: /etc/pgbind/client.crt
//!   key: /etc/pgbind/client.key
//! ```
//!
//! Every certificate field takes either inline PEM or a file path.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionConfig, DEFAULT_APPLICATION_NAME};
use crate::error::ConfigError;
use crate::owner_role::OwnerRole;
use crate::security::validate_role_name;
use crate::tls::SslMode;
use crate::types::SensitiveString;

/// Regex for `${VAR}` and `${VAR:-default}` references
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Connection and owner-role settings for one database
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Server host name or IP address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database binding users are provisioned in
    pub database: String,

    /// Admin principal
    pub username: String,

    /// Admin password; may be omitted when a client certificate authenticates
    #[serde(default)]
    pub password: Option<SensitiveString>,

    /// Shared owner role for every binding user
    pub data_owner_role: String,

    /// `verify-ca` or `verify-full`
    #[serde(default)]
    pub sslmode: SslMode,

    /// Root CA (inline PEM or file path)
    #[serde(default)]
    pub sslrootcert: Option<String>,

    /// Client certificate for mutual TLS
    #[serde(default)]
    pub clientcert: Option<ClientCertConfig>,

    /// Connection establishment timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Server-side statement timeout in milliseconds
    #[serde(default)]
    pub statement_timeout_ms: Option<u64>,

    /// Application name reported to the server
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

/// Client certificate and key (inline PEM or file paths)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientCertConfig {
    /// Certificate chain
    pub cert: String,
    /// Private key
    pub key: SensitiveString,
}

fn default_port() -> u16 {
    5432
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_application_name() -> String {
    DEFAULT_APPLICATION_NAME.to_string()
}

impl ProviderConfig {
    /// Load, expand and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse, expand and validate YAML text
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let expanded = Self::expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("'host' is required"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("'port' must be non-zero"));
        }
        if self.database.is_empty() {
            return Err(ConfigError::invalid("'database' is required"));
        }
        if self.username.is_empty() {
            return Err(ConfigError::invalid("'username' is required"));
        }
        validate_role_name(&self.data_owner_role)
            .map_err(|e| ConfigError::invalid(format!("'data_owner_role': {e}")))?;
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid("'connect_timeout_secs' must be non-zero"));
        }
        if self.sslmode == SslMode::VerifyCa && self.sslrootcert.is_none() {
            return Err(ConfigError::invalid(
                "'sslrootcert' is required for sslmode verify-ca",
            ));
        }
        if self.effective_password().is_none() && self.clientcert.is_none() {
            return Err(ConfigError::invalid(
                "either 'password' or 'clientcert' is required",
            ));
        }
        Ok(())
    }

    /// An empty password (e.g. an unset `${VAR}`) counts as no password
    fn effective_password(&self) -> Option<&SensitiveString> {
        self.password.as_ref().filter(|p| !p.is_empty())
    }

    /// Connection parameters for the admin principal
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(&self.host, self.port, &self.database, &self.username)
            .with_ssl_mode(self.sslmode)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_application_name(&self.application_name);
        if let Some(password) = self.effective_password() {
            config = config.with_password(password.clone());
        }
        if let Some(root) = &self.sslrootcert {
            config = config.with_root_ca(root);
        }
        if let Some(client) = &self.clientcert {
            config = config.with_client_identity(&client.cert, client.key.expose_secret());
        }
        if let Some(ms) = self.statement_timeout_ms {
            config = config.with_statement_timeout(Duration::from_millis(ms));
        }
        config
    }

    /// The configured owner role
    pub fn owner_role(&self) -> Result<OwnerRole, ConfigError> {
        OwnerRole::new(&self.data_owner_role)
            .map_err(|e| ConfigError::invalid(format!("'data_owner_role': {e}")))
    }
}
