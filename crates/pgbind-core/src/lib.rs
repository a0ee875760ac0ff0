//! # pgbind-core
//!
//! Least-privilege PostgreSQL credentials ("binding users") under a shared,
//! long-lived data owner role.
//!
//! ## Features
//!
//! - **Verified TLS only**: `verify-ca` or `verify-full`, optional client certificate
//! - **Idempotent owner role**: created once, never dropped as a side effect
//! - **Reconciliation**: fresh create, managed refresh or legacy adoption,
//!   decided from the catalog on every call
//! - **Safe teardown**: owned objects move to the owner role before the login
//!   role is dropped
//! - **Atomic steps**: every multi-statement change is a single implicit transaction
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pgbind_core::prelude::*;
//!
//! let config = ProviderConfig::from_file("provider.yaml")?;
//! let service = BindingService::from_config(&config)?;
//!
//! let user = BindingUser::new("4f1c9b2e-binding", password)?;
//! match service.provision(&user).await? {
//!     ProvisionOutcome::CreatedFresh => println!("created"),
//!     ProvisionOutcome::ReconciledManaged => println!("up to date"),
//!     ProvisionOutcome::AdoptedLegacy => println!("adopted"),
//! }
//!
//! service.deprovision("4f1c9b2e-binding").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod binding_user;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod ddl;
pub mod error;
pub mod owner_role;
pub mod security;
pub mod service;
pub mod teardown;
pub mod testing;
pub mod tls;
pub mod types;

pub use binding_user::{
    BindingUser, BindingUserState, Provenance, ProvisionOutcome, Reconciler,
};
pub use config::ProviderConfig;
pub use connection::{ConnectionConfig, PgConnectionFactory, PgSession, SessionFactory, SqlSession};
pub use error::{
    ConfigError, ConnectionError, Error, ErrorCategory, ProvisionError, Result, SqlError,
    TeardownError,
};
pub use owner_role::{OwnerRole, OwnerRoleOutcome, OwnerRoleRemoval};
pub use service::BindingService;
pub use teardown::{TeardownCoordinator, TeardownOutcome};
pub use tls::SslMode;
pub use types::SensitiveString;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::binding_user::{BindingUser, Provenance, ProvisionOutcome, Reconciler};
    pub use crate::config::ProviderConfig;
    pub use crate::connection::{
        ConnectionConfig, PgConnectionFactory, SessionFactory, SqlSession,
    };
    pub use crate::error::{
        ConnectionError, Error, ErrorCategory, ProvisionError, Result, TeardownError,
    };
    pub use crate::owner_role::{OwnerRole, OwnerRoleOutcome, OwnerRoleRemoval};
    pub use crate::service::BindingService;
    pub use crate::teardown::{TeardownCoordinator, TeardownOutcome};
    pub use crate::tls::SslMode;
    pub use crate::types::SensitiveString;
}
