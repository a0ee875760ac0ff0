//! The shared data owner role
//!
//! An [`OwnerRole`] is a `NOLOGIN` role that owns every object binding users
//! create. It outlives all of its binding users and is only removed through
//! the explicit [`OwnerRole::remove`].

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{self, RoleInfo, RoleMember, RolePrivilege};
use crate::connection::SqlSession;
use crate::ddl;
use crate::error::{ProvisionError, SqlError, SqlStateKind};
use crate::security::{validate_role_name, IdentifierError};

/// Result of [`OwnerRole::ensure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerRoleOutcome {
    /// The role was created by this call
    Created,
    /// The role already existed (possibly created concurrently)
    AlreadyPresent,
}

/// Result of [`OwnerRole::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerRoleRemoval {
    /// The role was dropped
    Removed,
    /// There was nothing to drop
    AlreadyAbsent,
}

/// A named data owner role
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerRole {
    name: String,
}

impl OwnerRole {
    /// Create a handle for the owner role `name`
    pub fn new(name: impl Into<String>) -> Result<Self, IdentifierError> {
        let name = name.into();
        validate_role_name(&name)?;
        Ok(Self { name })
    }

    /// Role name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make sure the role exists as a non-login role the admin can act as.
    ///
    /// Never modifies an existing role. Losing a creation race to another
    /// caller counts as [`OwnerRoleOutcome::AlreadyPresent`].
    pub async fn ensure(&self, session: &dyn SqlSession) -> Result<OwnerRoleOutcome, ProvisionError> {
        let admin = catalog::current_principal(session).await?;

        if let Some(existing) = catalog::fetch_role(session, &self.name).await? {
            self.adopt_existing(session, &admin, &existing).await?;
            debug!(role = %self.name, "Owner role already present");
            return Ok(OwnerRoleOutcome::AlreadyPresent);
        }

        let database = catalog::current_database(session).await?;
        let mut statements = vec![
            ddl::create_owner_role(&self.name),
            ddl::grant_database(&database, &self.name),
        ];
        if !admin.is_superuser {
            statements.push(ddl::grant_role_to_current_user(&self.name));
        }

        match session.batch_execute(&ddl::batch(&statements)).await {
            Ok(()) => {
                info!(role = %self.name, database = %database, "Created owner role");
                Ok(OwnerRoleOutcome::Created)
            }
            Err(e) if e.kind() == SqlStateKind::Duplicate => {
                info!(role = %self.name, "Owner role created concurrently, using existing role");
                match catalog::fetch_role(session, &self.name).await? {
                    Some(existing) => {
                        self.adopt_existing(session, &admin, &existing).await?;
                        Ok(OwnerRoleOutcome::AlreadyPresent)
                    }
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn adopt_existing(
        &self,
        session: &dyn SqlSession,
        admin: &RoleInfo,
        existing: &RoleInfo,
    ) -> Result<(), ProvisionError> {
        if existing.is_superuser {
            return Err(ProvisionError::name_collision(
                &self.name,
                "is a superuser role and cannot serve as a data owner role",
            ));
        }
        if existing.can_login {
            warn!(role = %self.name, "Owner role is a login role; using it as-is");
        }
        if let Some(grant) = admin_grant(session, admin, &self.name).await? {
            session.batch_execute(&grant).await?;
            debug!(role = %self.name, admin = %admin.name, "Granted owner role to admin");
        }
        Ok(())
    }

    /// Direct members of the role that can log in
    pub async fn members(&self, session: &dyn SqlSession) -> Result<Vec<RoleMember>, ProvisionError> {
        Ok(catalog::direct_members(session, &self.name)
            .await?
            .into_iter()
            .filter(|m| m.can_login)
            .collect())
    }

    /// Drop the role. Refuses while any login member remains or while it
    /// still owns objects; never cascades.
    pub async fn remove(&self, session: &dyn SqlSession) -> Result<OwnerRoleRemoval, ProvisionError> {
        let Some(existing) = catalog::fetch_role(session, &self.name).await? else {
            debug!(role = %self.name, "Owner role already absent");
            return Ok(OwnerRoleRemoval::AlreadyAbsent);
        };
        if existing.can_login || existing.is_superuser {
            return Err(ProvisionError::name_collision(
                &self.name,
                "is not a data owner role",
            ));
        }

        // the admin holds membership from creating the role; that does not count
        let admin = catalog::current_principal(session).await?;
        let members: Vec<RoleMember> = self
            .members(session)
            .await?
            .into_iter()
            .filter(|m| m.name != admin.name)
            .collect();
        if !members.is_empty() {
            let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
            return Err(ProvisionError::in_use(
                &self.name,
                format!("login members remain: {}", names.join(", ")),
            ));
        }

        let database = catalog::current_database(session).await?;
        let statements = [
            ddl::revoke_database(&database, &self.name),
            ddl::drop_role(&self.name),
        ];
        match session.batch_execute(&ddl::batch(&statements)).await {
            Ok(()) => {
                info!(role = %self.name, "Removed owner role");
                Ok(OwnerRoleRemoval::Removed)
            }
            Err(e) if e.kind() == SqlStateKind::UndefinedObject => {
                Ok(OwnerRoleRemoval::AlreadyAbsent)
            }
            Err(e) if e.kind() == SqlStateKind::DependentObjects => {
                Err(ProvisionError::in_use(&self.name, e.message))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Display for OwnerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// The `GRANT <role> TO CURRENT_USER` the admin needs to act for `role`, if any.
///
/// `ALTER DEFAULT PRIVILEGES FOR ROLE`, `REASSIGN OWNED` and `DROP OWNED` all
/// require the admin to hold the role's privileges. Superusers already do.
pub(crate) async fn admin_grant(
    session: &dyn SqlSession,
    admin: &RoleInfo,
    role: &str,
) -> Result<Option<String>, SqlError> {
    if admin.is_superuser || admin.name == role {
        return Ok(None);
    }
    if catalog::current_user_has_role(session, role, RolePrivilege::Usage).await? {
        return Ok(None);
    }
    Ok(Some(ddl::grant_role_to_current_user(role)))
}
