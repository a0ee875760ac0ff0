//! Binding user reconciliation
//!
//! Drives a desired `(username, password)` to a login role that belongs to
//! the owner role. Which path runs is decided from the catalog on every call:
//!
//! | catalog state                          | path                          |
//! |----------------------------------------|-------------------------------|
//! | role absent                            | fresh create                  |
//! | direct member and `role=<owner>` set   | managed: refresh password     |
//! | any other login role                   | legacy: add membership edges  |
//! | non-login or superuser role            | [`ProvisionError::NameCollision`] |
//! | `role=<other>` set                     | [`ProvisionError::NameCollision`] |
//! | legacy role with `NOINHERIT`           | [`ProvisionError::NameCollision`] |
//!
//! The legacy path is additive only. It never changes the password, never
//! sets the session role (that would hide the user's own objects from it)
//! and never drops anything.

use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{self, RoleInfo, RolePrivilege};
use crate::connection::SqlSession;
use crate::ddl;
use crate::error::{ProvisionError, SqlError, SqlStateKind};
use crate::owner_role::{admin_grant, OwnerRole};
use crate::security::{validate_password, validate_role_name};
use crate::types::SensitiveString;

/// How an existing binding user came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Created by this system: member of the owner role, acts as it at login
    Managed,
    /// Pre-existing login role with a different structure
    Legacy,
}

impl Provenance {
    /// Classify an existing login role relative to `owner`
    pub fn classify(role: &RoleInfo, owner: &OwnerRole, direct_member: bool) -> Self {
        if direct_member && role.session_role() == Some(owner.name()) {
            Provenance::Managed
        } else {
            Provenance::Legacy
        }
    }
}

/// Result of [`Reconciler::provision`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// A new login role was created
    CreatedFresh,
    /// An existing managed role was brought up to date
    ReconciledManaged,
    /// A legacy role was attached to the owner role
    AdoptedLegacy,
}

impl ProvisionOutcome {
    /// Provenance of the role after this outcome
    pub fn provenance(self) -> Provenance {
        match self {
            ProvisionOutcome::CreatedFresh | ProvisionOutcome::ReconciledManaged => {
                Provenance::Managed
            }
            ProvisionOutcome::AdoptedLegacy => Provenance::Legacy,
        }
    }
}

/// Desired state of one binding user
#[derive(Debug, Clone)]
pub struct BindingUser {
    username: String,
    password: SensitiveString,
}

impl BindingUser {
    /// Validate and wrap a provisioning request
    pub fn new(
        username: impl Into<String>,
        password: impl Into<SensitiveString>,
    ) -> Result<Self, ProvisionError> {
        let username = username.into();
        let password = password.into();
        validate_role_name(&username)?;
        validate_password(password.expose_secret()).map_err(|reason| {
            ProvisionError::InvalidPassword {
                reason: reason.to_string(),
            }
        })?;
        Ok(Self { username, password })
    }

    /// Login role name
    pub fn username(&self) -> &str {
        &self.username
    }
}

/// Observed state of a binding user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingUserState {
    /// Login role name
    pub username: String,
    /// Managed or legacy
    pub provenance: Provenance,
    /// `pg_has_role(username, owner, 'MEMBER')`
    pub owner_member: bool,
    /// Granted the owner role directly
    pub direct_member: bool,
    /// Role switched to at login, if any
    pub session_role: Option<String>,
    /// Relations, schemas and routines the role itself owns
    pub owned_objects: i64,
}

/// Reconciles binding users under one owner role
#[derive(Debug, Clone, Copy)]
pub struct Reconciler<'a> {
    owner: &'a OwnerRole,
}

impl<'a> Reconciler<'a> {
    /// Reconciler for binding users of `owner`
    pub fn new(owner: &'a OwnerRole) -> Self {
        Self { owner }
    }

    /// Converge `user` to a member of the owner role.
    ///
    /// Safe to repeat. Only `user`'s own role is read or written; sibling
    /// binding users are never inspected.
    pub async fn provision(
        &self,
        session: &dyn SqlSession,
        user: &BindingUser,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let username = user.username();
        if username == self.owner.name() {
            return Err(ProvisionError::name_collision(
                username,
                "is the data owner role",
            ));
        }

        self.owner.ensure(session).await?;
        let admin = catalog::current_principal(session).await?;
        if admin.name == username {
            return Err(ProvisionError::name_collision(
                username,
                "is the admin principal",
            ));
        }

        if let Some(existing) = catalog::fetch_role(session, username).await? {
            return self.reconcile_existing(session, &admin, existing, user).await;
        }

        match self.create_fresh(session, &admin, user).await {
            Ok(()) => {
                info!(user = %username, owner = %self.owner, "Created binding user");
                Ok(ProvisionOutcome::CreatedFresh)
            }
            Err(e) if e.kind() == SqlStateKind::Duplicate => {
                info!(user = %username, "Binding user created concurrently, re-probing");
                match catalog::fetch_role(session, username).await? {
                    Some(existing) => self.reconcile_existing(session, &admin, existing, user).await,
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// One atomic batch: role, admin access, session role, default privileges
    async fn create_fresh(
        &self,
        session: &dyn SqlSession,
        admin: &RoleInfo,
        user: &BindingUser,
    ) -> Result<(), SqlError> {
        let (username, owner) = (user.username(), self.owner.name());
        let mut statements = vec![ddl::create_login_role(
            username,
            user.password.expose_secret(),
            owner,
        )];
        if !admin.is_superuser {
            statements.push(ddl::grant_role_to_current_user(username));
        }
        statements.push(ddl::set_session_role(username, owner));
        statements.extend(ddl::default_privileges(username, owner));
        session.batch_execute(&ddl::batch(&statements)).await
    }

    async fn reconcile_existing(
        &self,
        session: &dyn SqlSession,
        admin: &RoleInfo,
        existing: RoleInfo,
        user: &BindingUser,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let (username, owner) = (user.username(), self.owner.name());
        if !existing.can_login {
            return Err(ProvisionError::name_collision(username, "is a non-login role"));
        }
        if existing.is_superuser {
            return Err(ProvisionError::name_collision(username, "is a superuser role"));
        }
        if let Some(other) = existing.session_role().filter(|role| *role != owner) {
            return Err(ProvisionError::name_collision(
                username,
                format!("already acts as role {other:?}"),
            ));
        }

        let direct_member = catalog::is_direct_member(session, owner, username).await?;
        let provenance = Provenance::classify(&existing, self.owner, direct_member);
        debug!(user = %username, ?provenance, direct_member, "Existing binding user found");
        // membership alone grants nothing to a NOINHERIT role without a session role
        if provenance == Provenance::Legacy && !existing.inherits {
            return Err(ProvisionError::name_collision(
                username,
                "is NOINHERIT and would not use the owner role's privileges",
            ));
        }

        let mut statements = Vec::new();
        if let Some(grant) = admin_grant(session, admin, username).await? {
            statements.push(grant);
        }

        let outcome = match provenance {
            Provenance::Managed => {
                statements.push(ddl::set_password(username, user.password.expose_secret()));
                ProvisionOutcome::ReconciledManaged
            }
            Provenance::Legacy => {
                if !direct_member {
                    statements.push(ddl::grant_role(owner, username));
                }
                ProvisionOutcome::AdoptedLegacy
            }
        };
        statements.extend(ddl::default_privileges(username, owner));

        session.batch_execute(&ddl::batch(&statements)).await?;
        info!(user = %username, owner = %owner, ?outcome, "Reconciled binding user");
        Ok(outcome)
    }

    /// Report the current state of `username`, or `None` if it does not exist.
    pub async fn inspect(
        &self,
        session: &dyn SqlSession,
        username: &str,
    ) -> Result<Option<BindingUserState>, ProvisionError> {
        validate_role_name(username)?;
        let Some(role) = catalog::fetch_role(session, username).await? else {
            return Ok(None);
        };
        let owner = self.owner.name();
        let direct_member = catalog::is_direct_member(session, owner, username).await?;
        let owner_member =
            catalog::has_role(session, username, owner, RolePrivilege::Member).await?;
        let owned_objects = catalog::owned_object_count(session, username).await?;

        Ok(Some(BindingUserState {
            username: role.name.clone(),
            provenance: Provenance::classify(&role, self.owner, direct_member),
            owner_member,
            direct_member,
            session_role: role.session_role().map(str::to_string),
            owned_objects,
        }))
    }
}
