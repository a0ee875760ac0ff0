//! Binding user teardown
//!
//! Drops exactly one login role. Anything it owns is handed to the owner role
//! first, so schemas, tables and rows survive, and sibling binding users and
//! the owner role itself are never touched.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog;
use crate::connection::SqlSession;
use crate::ddl;
use crate::error::{SqlStateKind, TeardownError};
use crate::owner_role::{admin_grant, OwnerRole};
use crate::security::validate_role_name;

/// Result of [`TeardownCoordinator::deprovision`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownOutcome {
    /// The login role was dropped
    Dropped,
    /// There was nothing to drop
    AlreadyAbsent,
}

/// Drops binding users of one owner role
#[derive(Debug, Clone, Copy)]
pub struct TeardownCoordinator<'a> {
    owner: &'a OwnerRole,
}

impl<'a> TeardownCoordinator<'a> {
    /// Coordinator for binding users of `owner`
    pub fn new(owner: &'a OwnerRole) -> Self {
        Self { owner }
    }

    /// Revoke membership, hand owned objects to the owner role and drop the
    /// login role, all in one atomic batch. A missing role is success.
    pub async fn deprovision(
        &self,
        session: &dyn SqlSession,
        username: &str,
    ) -> Result<TeardownOutcome, TeardownError> {
        validate_role_name(username)?;
        let owner = self.owner.name();
        if username == owner {
            return Err(TeardownError::protected(username, "is the data owner role"));
        }

        let Some(role) = catalog::fetch_role(session, username).await? else {
            debug!(user = %username, "Binding user already absent");
            return Ok(TeardownOutcome::AlreadyAbsent);
        };
        if !role.can_login {
            return Err(TeardownError::protected(username, "is a non-login role"));
        }
        if role.is_superuser {
            return Err(TeardownError::protected(username, "is a superuser role"));
        }

        let admin = catalog::current_principal(session).await?;
        if admin.name == username {
            return Err(TeardownError::protected(username, "is the admin principal"));
        }

        let mut statements = Vec::new();
        if let Some(grant) = admin_grant(session, &admin, username).await? {
            statements.push(grant);
        }

        if catalog::fetch_role(session, owner).await?.is_some() {
            if let Some(grant) = admin_grant(session, &admin, owner).await? {
                statements.push(grant);
            }
            statements.push(ddl::revoke_role(owner, username));
            statements.push(ddl::reassign_owned(username, owner));
        } else {
            let owned = catalog::owned_object_count(session, username).await?;
            if owned > 0 {
                return Err(TeardownError::DependentObjects {
                    role: username.to_string(),
                    message: format!(
                        "owns {owned} objects and owner role {owner:?} does not exist to receive them"
                    ),
                });
            }
            warn!(user = %username, owner = %owner, "Owner role missing; dropping binding user without reassignment");
        }
        statements.push(ddl::drop_owned(username));
        statements.push(ddl::drop_role(username));

        match session.batch_execute(&ddl::batch(&statements)).await {
            Ok(()) => {
                info!(user = %username, owner = %owner, "Dropped binding user");
                Ok(TeardownOutcome::Dropped)
            }
            Err(e) if e.kind() == SqlStateKind::UndefinedObject => {
                debug!(user = %username, "Binding user dropped concurrently");
                Ok(TeardownOutcome::AlreadyAbsent)
            }
            Err(e) => Err(TeardownError::from_sql(username, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSession;

    #[tokio::test]
    async fn test_invalid_name_rejected_before_probing() {
        let session = MockSession::new();
        let owner = OwnerRole::new("app_owner").unwrap();
        let err = TeardownCoordinator::new(&owner)
            .deprovision(&session, "")
            .await
            .unwrap_err();
        assert!(matches!(err, TeardownError::InvalidName(_)));
        assert!(session.queries().is_empty());
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        let json = serde_json::to_string(&TeardownOutcome::AlreadyAbsent).unwrap();
        assert_eq!(json, "\"already_absent\"");
    }
}
