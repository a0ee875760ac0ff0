//! pgbind Integration Tests
//!
//! End-to-end tests that run the provisioning lifecycle against a real
//! PostgreSQL server. It is NOT published to crates.io.
//!
//! # Test Categories
//!
//! - **binding_user**: fresh provisioning, sibling isolation, data survival
//! - **legacy_adoption**: adopting login roles created outside pgbind
//! - **tls_connection**: verified TLS, client certificates, error categories
//!
//! # Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p pgbind-integration-tests
//!
//! # Run specific test suite
//! cargo test -p pgbind-integration-tests --test legacy_adoption
//!
//! # Run with logging
//! RUST_LOG=debug cargo test -p pgbind-integration-tests -- --nocapture
//! ```
//!
//! # Requirements
//!
//! Tests use testcontainers and require Docker to be running. The server
//! only accepts TLS connections that present a client certificate signed by
//! a per-run CA, so every session goes through the verified-TLS path.

pub mod fixtures;
pub mod helpers;
pub mod verifier;

pub use fixtures::*;
pub use helpers::*;
