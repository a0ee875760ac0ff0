//! Orchestrator-facing facade
//!
//! [`BindingService`] opens one admin session per call, runs a single
//! lifecycle operation and drops the session on every exit path, including
//! cancellation of the returned future.

use tracing::debug;

use crate::binding_user::{BindingUser, BindingUserState, ProvisionOutcome, Reconciler};
use crate::catalog;
use crate::config::ProviderConfig;
use crate::connection::{ConnectionConfig, PgConnectionFactory, SessionFactory};
use crate::error::{ConfigError, ConnectionError, Error, ProvisionError, TeardownError};
use crate::owner_role::{OwnerRole, OwnerRoleOutcome, OwnerRoleRemoval};
use crate::teardown::{TeardownCoordinator, TeardownOutcome};

/// Provisioning entry point for one database and owner role
#[derive(Debug)]
pub struct BindingService<F: SessionFactory = PgConnectionFactory> {
    connection: ConnectionConfig,
    owner: OwnerRole,
    factory: F,
}

impl BindingService<PgConnectionFactory> {
    /// Build a service from validated provider configuration
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_factory(
            config.connection_config(),
            config.owner_role()?,
            PgConnectionFactory::new(),
        ))
    }
}

impl<F: SessionFactory> BindingService<F> {
    /// Build a service around an explicit session factory
    pub fn with_factory(connection: ConnectionConfig, owner: OwnerRole, factory: F) -> Self {
        Self {
            connection,
            owner,
            factory,
        }
    }

    /// The owner role binding users are provisioned under
    pub fn owner_role(&self) -> &OwnerRole {
        &self.owner
    }

    /// The session factory
    pub fn factory(&self) -> &F {
        &self.factory
    }

    async fn open(&self) -> Result<F::Session, ConnectionError> {
        let session = self.factory.connect(&self.connection).await?;
        debug!(
            host = %self.connection.host,
            database = %self.connection.database,
            "Admin session opened"
        );
        Ok(session)
    }

    /// Connect and report the authenticated principal
    pub async fn check(&self) -> Result<String, Error> {
        let session = self.open().await?;
        let principal = catalog::current_principal(&session)
            .await
            .map_err(ProvisionError::from)?;
        Ok(principal.name)
    }

    /// Create the owner role if it does not exist
    pub async fn ensure_owner_role(&self) -> Result<OwnerRoleOutcome, ProvisionError> {
        let session = self.open().await?;
        self.owner.ensure(&session).await
    }

    /// Create, reconcile or adopt a binding user
    pub async fn provision(&self, user: &BindingUser) -> Result<ProvisionOutcome, ProvisionError> {
        let session = self.open().await?;
        Reconciler::new(&self.owner).provision(&session, user).await
    }

    /// Drop a binding user, keeping everything it created
    pub async fn deprovision(&self, username: &str) -> Result<TeardownOutcome, TeardownError> {
        let session = self.open().await?;
        TeardownCoordinator::new(&self.owner)
            .deprovision(&session, username)
            .await
    }

    /// Observed state of a binding user
    pub async fn inspect(&self, username: &str) -> Result<Option<BindingUserState>, ProvisionError> {
        let session = self.open().await?;
        Reconciler::new(&self.owner).inspect(&session, username).await
    }

    /// Drop the owner role once it has no login members left
    pub async fn remove_owner_role(&self) -> Result<OwnerRoleRemoval, ProvisionError> {
        let session = self.open().await?;
        self.owner.remove(&session).await
    }
}
