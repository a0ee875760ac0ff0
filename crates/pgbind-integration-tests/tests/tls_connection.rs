//! TLS Connection Integration Tests
//!
//! The admin session only ever uses verified TLS. These tests cover inline
//! and file-based certificate material and how each failure is reported.
//!
//! Run with: cargo test -p pgbind-integration-tests --test tls_connection -- --nocapture
//!
//! Requirements: Docker must be running for testcontainers.

use anyhow::Result;
use pgbind_core::{BindingService, ConnectionError, ErrorCategory, SslMode};
use pgbind_integration_tests::fixtures::{TestPki, TestPostgres, ADMIN_USER};
use pgbind_integration_tests::helpers::*;

/// Inline PEM material reaches the server as the admin principal
#[tokio::test]
async fn test_check_with_inline_material() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    let service = pg.service("postgres", "data_owner")?;

    assert_eq!(service.check().await?, ADMIN_USER);
    Ok(())
}

/// The same material given as file paths behaves identically
#[tokio::test]
async fn test_check_with_file_material() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    let dir = tempfile::tempdir()?;
    let ca = dir.path().join("ca.crt");
    let cert = dir.path().join("client.crt");
    let key = dir.path().join("client.key");
    std::fs::write(&ca, &pg.pki.ca_pem)?;
    std::fs::write(&cert, &pg.pki.client_cert_pem)?;
    std::fs::write(&key, &pg.pki.client_key_pem)?;

    let mut config = pg.provider_config("postgres", "data_owner");
    config.sslrootcert = Some(ca.display().to_string());
    if let Some(client) = config.clientcert.as_mut() {
        client.cert = cert.display().to_string();
        client.key = key.display().to_string().into();
    }

    let service = BindingService::from_config(&config)?;
    assert_eq!(service.check().await?, ADMIN_USER);
    Ok(())
}

/// verify-full accepts the server when the host matches its certificate
#[tokio::test]
async fn test_verify_full_matching_host() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    let mut config = pg.provider_config("postgres", "data_owner");
    config.sslmode = SslMode::VerifyFull;

    let service = BindingService::from_config(&config)?;
    assert_eq!(service.check().await?, ADMIN_USER);
    Ok(())
}

/// A server certificate from another CA is a TLS failure, not retriable
#[tokio::test]
async fn test_untrusted_server_is_tls_error() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    let mut config = pg.provider_config("postgres", "data_owner");
    config.sslrootcert = Some(TestPki::foreign_ca_pem()?);

    let err = BindingService::from_config(&config)?
        .check()
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Tls, "{err}");
    assert!(!err.is_retriable());
    Ok(())
}

/// A wrong admin password is an authentication failure
#[tokio::test]
async fn test_bad_password_is_authentication_error() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    let mut config = pg.provider_config("postgres", "data_owner");
    config.password = Some("not-the-password".into());

    let err = BindingService::from_config(&config)?
        .check()
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Authentication, "{err}");
    Ok(())
}

/// The server demands a client certificate; without one the session is refused
#[tokio::test]
async fn test_missing_client_certificate_rejected() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    let mut config = pg.provider_config("postgres", "data_owner");
    config.clientcert = None;

    let err = BindingService::from_config(&config)?
        .check()
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            pgbind_core::Error::Connection(ConnectionError::Authentication { .. })
                | pgbind_core::Error::Connection(ConnectionError::Tls { .. })
        ),
        "{err:?}"
    );
    assert!(!err.is_retriable());
    Ok(())
}

/// Nothing listening is a network failure, which callers may retry
#[tokio::test]
async fn test_unreachable_server_is_retriable() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    let mut config = pg.provider_config("postgres", "data_owner");
    config.port = 1;
    config.connect_timeout_secs = 5;

    let err = BindingService::from_config(&config)?
        .check()
        .await
        .unwrap_err();
    assert!(err.is_retriable(), "{err:?}");
    Ok(())
}
