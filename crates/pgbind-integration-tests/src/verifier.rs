//! Catalog assertions run from a superuser session

use anyhow::{Context, Result};
use pgbind_core::SqlSession;

/// Read-only checks against the server catalog and test data
pub struct Verifier<'a> {
    session: &'a dyn SqlSession,
}

impl<'a> Verifier<'a> {
    pub fn new(session: &'a dyn SqlSession) -> Self {
        Self { session }
    }

    pub async fn role_exists(&self, name: &str) -> Result<bool> {
        let row = self
            .session
            .query_opt(
                "SELECT rolname::text AS name FROM pg_roles WHERE rolname = $1::text::name",
                &[name],
            )
            .await?;
        Ok(row.is_some())
    }

    pub async fn can_login(&self, name: &str) -> Result<bool> {
        let row = self
            .session
            .query_one(
                "SELECT rolcanlogin AS can_login FROM pg_roles WHERE rolname = $1::text::name",
                &[name],
            )
            .await?;
        row.get_bool("can_login").context("missing can_login")
    }

    /// Effective membership, direct or inherited
    pub async fn is_member(&self, member: &str, group: &str) -> Result<bool> {
        let row = self
            .session
            .query_one(
                "SELECT pg_has_role($1::text::name, $2::text::name, 'MEMBER') AS member",
                &[member, group],
            )
            .await?;
        row.get_bool("member").context("missing member")
    }

    /// Owner of a relation given as `schema.name`
    pub async fn relation_owner(&self, relation: &str) -> Result<String> {
        let row = self
            .session
            .query_one(
                "SELECT pg_get_userbyid(relowner)::text AS owner FROM pg_class \
                 WHERE oid = $1::text::regclass",
                &[relation],
            )
            .await?;
        row.get_str("owner")
            .map(str::to_string)
            .context("missing owner")
    }

    /// Number of rows in `relation`; the name is trusted test input
    pub async fn row_count(&self, relation: &str) -> Result<i64> {
        let row = self
            .session
            .query_one(&format!("SELECT count(*) AS n FROM {relation}"), &[])
            .await?;
        row.get_i64("n").context("missing count")
    }

    /// The `value` column of a single-row query
    pub async fn text_value(&self, sql: &str) -> Result<String> {
        let row = self.session.query_one(sql, &[]).await?;
        row.get_str("value")
            .map(str::to_string)
            .context("missing text column 'value'")
    }
}
