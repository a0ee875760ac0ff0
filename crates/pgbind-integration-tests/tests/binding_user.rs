//! Binding User Integration Tests
//!
//! Provisioning, reconciliation and teardown against a real PostgreSQL 16
//! server reached over verified mutual TLS.
//!
//! Run with: cargo test -p pgbind-integration-tests --test binding_user -- --nocapture
//!
//! Requirements: Docker must be running for testcontainers.

use anyhow::Result;
use pgbind_core::{
    BindingUser, ErrorCategory, OwnerRoleRemoval, Provenance, ProvisionError, ProvisionOutcome,
    SqlSession, TeardownOutcome,
};
use pgbind_integration_tests::fixtures::TestPostgres;
use pgbind_integration_tests::helpers::*;
use pgbind_integration_tests::verifier::Verifier;
use tracing::info;

// ============================================================================
// Fresh provisioning
// ============================================================================

/// A fresh user acts as the owner role, and its data outlives it
#[tokio::test]
async fn test_fresh_user_lifecycle() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    let database = pg.create_database().await?;
    let owner = unique_name("data_owner");
    let username = unique_name("binding");
    let password = random_password();
    let service = pg.service(&database, &owner)?;
    let user = BindingUser::new(username.as_str(), password.as_str())?;

    info!("Provisioning {}", username);
    assert_eq!(service.provision(&user).await?, ProvisionOutcome::CreatedFresh);

    {
        let session = pg.login(&database, &username, &password).await?;
        let me = Verifier::new(&session);
        assert_eq!(
            me.text_value("SELECT current_user::text AS value").await?,
            owner
        );
        session
            .batch_execute(
                "CREATE SCHEMA foo;
                 CREATE TABLE foo.bar (id integer PRIMARY KEY, name text NOT NULL);
                 INSERT INTO foo.bar VALUES (1, 'created by binding user')",
            )
            .await?;
    }

    let superuser = pg.superuser_in(&database).await?;
    let verify = Verifier::new(&superuser);
    assert_eq!(verify.relation_owner("foo.bar").await?, owner);
    assert!(verify.is_member(&username, &owner).await?);

    // second apply converges without changing anything visible
    assert_eq!(
        service.provision(&user).await?,
        ProvisionOutcome::ReconciledManaged
    );
    drop(pg.login(&database, &username, &password).await?);

    assert_eq!(service.deprovision(&username).await?, TeardownOutcome::Dropped);
    assert!(!verify.role_exists(&username).await?);
    assert!(verify.role_exists(&owner).await?);
    assert!(!verify.can_login(&owner).await?);
    assert_eq!(verify.row_count("foo.bar").await?, 1);

    assert_eq!(
        service.deprovision(&username).await?,
        TeardownOutcome::AlreadyAbsent
    );

    info!("Fresh user lifecycle test passed");
    Ok(())
}

/// Two users provisioned at once share the owner role; dropping one leaves
/// the other working
#[tokio::test]
async fn test_sibling_users_are_independent() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    let database = pg.create_database().await?;
    let owner = unique_name("data_owner");
    let service = pg.service(&database, &owner)?;

    let (name1, pass1) = (unique_name("binding"), random_password());
    let (name2, pass2) = (unique_name("binding"), random_password());
    let user1 = BindingUser::new(name1.as_str(), pass1.as_str())?;
    let user2 = BindingUser::new(name2.as_str(), pass2.as_str())?;

    let (first, second) = tokio::join!(service.provision(&user1), service.provision(&user2));
    assert_eq!(first?, ProvisionOutcome::CreatedFresh);
    assert_eq!(second?, ProvisionOutcome::CreatedFresh);

    {
        let session = pg.login(&database, &name1, &pass1).await?;
        session
            .batch_execute(
                "CREATE SCHEMA shared;
                 CREATE TABLE shared.items (id integer PRIMARY KEY);
                 INSERT INTO shared.items VALUES (1)",
            )
            .await?;
    }
    {
        let session = pg.login(&database, &name2, &pass2).await?;
        session
            .batch_execute("INSERT INTO shared.items VALUES (2)")
            .await?;
    }

    assert_eq!(service.deprovision(&name1).await?, TeardownOutcome::Dropped);

    let superuser = pg.superuser_in(&database).await?;
    let verify = Verifier::new(&superuser);
    assert!(!verify.role_exists(&name1).await?);
    assert!(verify.role_exists(&name2).await?);
    assert!(verify.is_member(&name2, &owner).await?);

    let session = pg.login(&database, &name2, &pass2).await?;
    assert_eq!(Verifier::new(&session).row_count("shared.items").await?, 2);

    let state = service
        .inspect(&name2)
        .await?
        .expect("second user still exists");
    assert_eq!(state.provenance, Provenance::Managed);
    assert!(state.owner_member);

    Ok(())
}

/// Re-provisioning a managed user applies the requested password
#[tokio::test]
async fn test_managed_password_rotation() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    let database = pg.create_database().await?;
    let owner = unique_name("data_owner");
    let username = unique_name("binding");
    let service = pg.service(&database, &owner)?;

    let (old, new) = (random_password(), random_password());
    service
        .provision(&BindingUser::new(username.as_str(), old.as_str())?)
        .await?;
    assert_eq!(
        service
            .provision(&BindingUser::new(username.as_str(), new.as_str())?)
            .await?,
        ProvisionOutcome::ReconciledManaged
    );

    let err = pg
        .connect(&pg.connection(&database, &username, &old))
        .await
        .expect_err("old password must be rejected");
    info!("Old password rejected: {:#}", err);
    drop(pg.login(&database, &username, &new).await?);

    Ok(())
}

// ============================================================================
// Owner role
// ============================================================================

/// The owner role cannot be removed while a binding user remains
#[tokio::test]
async fn test_owner_role_removal_requires_no_members() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    let database = pg.create_database().await?;
    let owner = unique_name("data_owner");
    let username = unique_name("binding");
    let service = pg.service(&database, &owner)?;

    service
        .provision(&BindingUser::new(username.as_str(), random_password())?)
        .await?;

    let err = service.remove_owner_role().await.unwrap_err();
    assert!(matches!(err, ProvisionError::InUse { .. }));
    assert_eq!(err.category(), ErrorCategory::InUse);

    service.deprovision(&username).await?;
    assert_eq!(service.remove_owner_role().await?, OwnerRoleRemoval::Removed);
    assert_eq!(
        service.remove_owner_role().await?,
        OwnerRoleRemoval::AlreadyAbsent
    );

    let superuser = pg.superuser_in(&database).await?;
    assert!(!Verifier::new(&superuser).role_exists(&owner).await?);

    Ok(())
}
