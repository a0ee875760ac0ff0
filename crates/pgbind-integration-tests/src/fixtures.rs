//! Test fixtures for integration tests
//!
//! Provides a TLS-only PostgreSQL container and the certificate material to
//! reach it.

use std::time::Duration;

use anyhow::{Context, Result};
use pgbind_core::config::ClientCertConfig;
use pgbind_core::{
    BindingService, ConnectionConfig, PgConnectionFactory, PgSession, ProviderConfig,
    SessionFactory, SqlSession, SslMode,
};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use tokio::time::sleep;
use tracing::info;

use crate::helpers::unique_name;

/// Bootstrap superuser of the container
pub const SUPERUSER: &str = "postgres";
const SUPERUSER_PASSWORD: &str = "postgres";

/// Non-superuser admin principal with `CREATEROLE` and `CREATEDB`, the shape
/// of a managed-cloud "superuser"
pub const ADMIN_USER: &str = "pgbind_admin";
/// Password of [`ADMIN_USER`]
pub const ADMIN_PASSWORD: &str = "pgbind_admin_password";

/// Sourced by the image entrypoint after `initdb`: installs the server key
/// pair and only admits TLS clients with a certificate from the test CA.
const SSL_INIT_SCRIPT: &str = r#"#!/bin/sh
cp /certs/server.crt "$PGDATA/server.crt"
cp /certs/server.key "$PGDATA/server.key"
cp /certs/ca.crt "$PGDATA/ca.crt"
chmod 600 "$PGDATA/server.key"
cat >> "$PGDATA/postgresql.conf" <<'EOF'
ssl = on
ssl_cert_file = 'server.crt'
ssl_key_file = 'server.key'
ssl_ca_file = 'ca.crt'
password_encryption = 'scram-sha-256'
EOF
cat > "$PGDATA/pg_hba.conf" <<'EOF'
local     all all     trust
hostnossl all all all reject
hostssl   all all all scram-sha-256 clientcert=verify-ca
EOF
"#;

// ============================================================================
// Certificates
// ============================================================================

/// A throwaway CA with one server and one client certificate
#[derive(Clone)]
pub struct TestPki {
    pub ca_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
}

impl TestPki {
    /// Generate a CA, a server certificate for `localhost` and a client certificate
    pub fn generate() -> Result<Self> {
        let (ca_cert, ca_key) = generate_ca("pgbind integration CA")?;

        let mut server_params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
        server_params
            .distinguished_name
            .push(DnType::CommonName, "localhost");
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server_key = KeyPair::generate()?;
        let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key)?;

        let mut client_params = CertificateParams::new(Vec::<String>::new())?;
        client_params
            .distinguished_name
            .push(DnType::CommonName, ADMIN_USER);
        client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let client_key = KeyPair::generate()?;
        let client_cert = client_params.signed_by(&client_key, &ca_cert, &ca_key)?;

        Ok(Self {
            ca_pem: ca_cert.pem(),
            server_cert_pem: server_cert.pem(),
            server_key_pem: server_key.serialize_pem(),
            client_cert_pem: client_cert.pem(),
            client_key_pem: client_key.serialize_pem(),
        })
    }

    /// PEM of an unrelated CA that signed nothing the server presents
    pub fn foreign_ca_pem() -> Result<String> {
        let (cert, _) = generate_ca("unrelated CA")?;
        Ok(cert.pem())
    }
}

fn generate_ca(common_name: &str) -> Result<(rcgen::Certificate, KeyPair)> {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.distinguished_name.push(DnType::CommonName, common_name);
    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;
    Ok((cert, key))
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container that only accepts verified mutual TLS
pub struct TestPostgres {
    pub container: testcontainers::ContainerAsync<testcontainers_modules::postgres::Postgres>,
    pub host: String,
    pub port: u16,
    pub pki: TestPki,
}

impl TestPostgres {
    /// Start the container and create [`ADMIN_USER`]
    pub async fn start() -> Result<Self> {
        use testcontainers::{runners::AsyncRunner, ImageExt};
        use testcontainers_modules::postgres::Postgres;

        let pki = TestPki::generate()?;

        let container = Postgres::default()
            .with_user(SUPERUSER)
            .with_password(SUPERUSER_PASSWORD)
            .with_tag("16-alpine")
            .with_copy_to("/certs/ca.crt", pki.ca_pem.clone().into_bytes())
            .with_copy_to("/certs/server.crt", pki.server_cert_pem.clone().into_bytes())
            .with_copy_to("/certs/server.key", pki.server_key_pem.clone().into_bytes())
            .with_copy_to(
                "/docker-entrypoint-initdb.d/10-ssl.sh",
                SSL_INIT_SCRIPT.as_bytes().to_vec(),
            )
            .start()
            .await?;

        // Retry port retrieval to handle testcontainers race condition
        let host = container.get_host().await?.to_string();
        let mut port = None;
        for i in 0..10 {
            match container.get_host_port_ipv4(5432).await {
                Ok(p) => {
                    port = Some(p);
                    break;
                }
                Err(e) => {
                    tracing::debug!(
                        "Waiting for PostgreSQL port exposure (attempt {}): {}",
                        i + 1,
                        e
                    );
                    sleep(Duration::from_millis(100 * (i + 1) as u64)).await;
                }
            }
        }
        let port =
            port.ok_or_else(|| anyhow::anyhow!("PostgreSQL port not exposed after retries"))?;

        let pg = Self {
            container,
            host,
            port,
            pki,
        };
        pg.wait_for_postgres().await?;
        pg.create_admin().await?;
        Ok(pg)
    }

    async fn wait_for_postgres(&self) -> Result<()> {
        for i in 0..30 {
            match self.superuser().await {
                Ok(session) => {
                    if session.batch_execute("SELECT 1").await.is_ok() {
                        info!("PostgreSQL ready after {} attempts", i + 1);
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::debug!("Waiting for PostgreSQL (attempt {}): {}", i + 1, e);
                }
            }
            sleep(Duration::from_millis(500)).await;
        }

        anyhow::bail!("PostgreSQL did not become ready in time")
    }

    async fn create_admin(&self) -> Result<()> {
        let session = self.superuser().await?;
        session
            .batch_execute(&format!(
                "CREATE ROLE {ADMIN_USER} WITH LOGIN PASSWORD '{ADMIN_PASSWORD}' \
                 NOSUPERUSER CREATEDB CREATEROLE"
            ))
            .await?;
        Ok(())
    }

    /// Connection parameters for `username` in `database` with the test
    /// client certificate, verifying the server against the test CA
    pub fn connection(&self, database: &str, username: &str, password: &str) -> ConnectionConfig {
        ConnectionConfig::new(&self.host, self.port, database, username)
            .with_password(password)
            .with_ssl_mode(SslMode::VerifyCa)
            .with_root_ca(&self.pki.ca_pem)
            .with_client_identity(&self.pki.client_cert_pem, &self.pki.client_key_pem)
            .with_connect_timeout(Duration::from_secs(10))
    }

    /// Open a session with the given parameters
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<PgSession> {
        let session = PgConnectionFactory::new()
            .connect(config)
            .await
            .with_context(|| format!("connecting as {}", config.username))?;
        Ok(session)
    }

    /// Superuser session in the default database
    pub async fn superuser(&self) -> Result<PgSession> {
        self.connect(&self.connection("postgres", SUPERUSER, SUPERUSER_PASSWORD))
            .await
    }

    /// Superuser session in `database`
    pub async fn superuser_in(&self, database: &str) -> Result<PgSession> {
        self.connect(&self.connection(database, SUPERUSER, SUPERUSER_PASSWORD))
            .await
    }

    /// Admin session in `database`
    pub async fn admin_in(&self, database: &str) -> Result<PgSession> {
        self.connect(&self.connection(database, ADMIN_USER, ADMIN_PASSWORD))
            .await
    }

    /// Session for a binding user in `database`
    pub async fn login(&self, database: &str, username: &str, password: &str) -> Result<PgSession> {
        self.connect(&self.connection(database, username, password))
            .await
    }

    /// Create a fresh database owned by [`ADMIN_USER`]
    pub async fn create_database(&self) -> Result<String> {
        let name = unique_name("db");
        let session = self.admin_in("postgres").await?;
        session
            .batch_execute(&format!("CREATE DATABASE \"{name}\""))
            .await?;
        info!("Created test database {}", name);
        Ok(name)
    }

    /// Provider configuration for [`ADMIN_USER`] with inline certificate material
    pub fn provider_config(&self, database: &str, owner_role: &str) -> ProviderConfig {
        ProviderConfig {
            host: self.host.clone(),
            port: self.port,
            database: database.to_string(),
            username: ADMIN_USER.to_string(),
            password: Some(ADMIN_PASSWORD.into()),
            data_owner_role: owner_role.to_string(),
            sslmode: SslMode::VerifyCa,
            sslrootcert: Some(self.pki.ca_pem.clone()),
            clientcert: Some(ClientCertConfig {
                cert: self.pki.client_cert_pem.clone(),
                key: self.pki.client_key_pem.as_str().into(),
            }),
            connect_timeout_secs: 10,
            statement_timeout_ms: Some(30_000),
            application_name: "pgbind-integration-tests".to_string(),
        }
    }

    /// A service for `owner_role` in `database`
    pub fn service(&self, database: &str, owner_role: &str) -> Result<BindingService> {
        Ok(BindingService::from_config(
            &self.provider_config(database, owner_role),
        )?)
    }
}
