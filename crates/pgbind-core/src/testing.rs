//! Testing utilities
//!
//! [`MockSession`] is an in-memory [`SqlSession`] that answers the catalog
//! probes from scripted state and records every statement batch, so
//! reconciliation logic can be tested without a server.
//!
//! # Example
//!
//! ```rust
//! use pgbind_core::testing::MockSession;
//! use pgbind_core::{OwnerRole, OwnerRoleOutcome};
//!
//! # tokio_test_block_on(async {
//! let session = MockSession::new();
//! let owner = OwnerRole::new("app_owner").unwrap();
//!
//! let outcome = owner.ensure(&session).await.unwrap();
//! assert_eq!(outcome, OwnerRoleOutcome::Created);
//! assert!(session.executed_sql().contains("CREATE ROLE \"app_owner\" WITH NOLOGIN"));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::catalog::{sql, RoleInfo, RoleMember};
use crate::connection::{ConnectionConfig, SessionFactory, SqlSession};
use crate::error::{ConnectionError, SqlError};
use crate::types::{Row, Value};

/// Name reported by [`MockSession`] for the connected principal
pub const MOCK_ADMIN: &str = "pgbind_admin";

/// Name reported by [`MockSession`] for the connected database
pub const MOCK_DATABASE: &str = "app";

type QueryResult = Result<Vec<Row>, SqlError>;

#[derive(Debug)]
struct Responder {
    sql: &'static str,
    /// Matches when these are a prefix of the actual parameters
    params: Vec<String>,
    results: VecDeque<QueryResult>,
}

impl Responder {
    fn matches(&self, sql: &str, params: &[&str]) -> bool {
        self.sql == sql
            && self.params.len() <= params.len()
            && self.params.iter().zip(params).all(|(want, got)| want == got)
    }

    fn next(&mut self) -> QueryResult {
        if self.results.len() > 1 {
            self.results.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        } else {
            self.results.front().cloned().unwrap_or_else(|| Ok(Vec::new()))
        }
    }
}

/// A scripted, recording [`SqlSession`]
#[derive(Debug)]
pub struct MockSession {
    responders: Mutex<Vec<Responder>>,
    batch_failures: Mutex<Vec<(String, SqlError)>>,
    batches: Mutex<Vec<String>>,
    queries: Mutex<Vec<(String, Vec<String>)>>,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    /// A session whose catalog contains only a non-superuser admin principal.
    ///
    /// Unscripted probes answer "absent", "not a member" and zero owned objects.
    pub fn new() -> Self {
        let session = Self {
            responders: Mutex::new(Vec::new()),
            batch_failures: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
        };
        let admin = RoleInfo {
            is_superuser: false,
            ..Self::role(MOCK_ADMIN, true)
        };
        session
            .on_query(sql::ROLE_BY_NAME, &[], vec![])
            .on_query(sql::CURRENT_PRINCIPAL, &[], vec![Self::role_row(&admin)])
            .on_query(sql::DIRECT_MEMBERSHIP, &[], vec![bool_row("present", false)])
            .on_query(sql::HAS_ROLE, &[], vec![bool_row("granted", false)])
            .on_query(sql::CURRENT_USER_HAS_ROLE, &[], vec![bool_row("granted", false)])
            .on_query(sql::DIRECT_MEMBERS, &[], vec![])
            .on_query(
                sql::CURRENT_DATABASE,
                &[],
                vec![Row::from_pairs([("name", Value::Text(MOCK_DATABASE.into()))])],
            )
            .on_query(sql::OWNED_OBJECT_COUNT, &[], vec![int_row("owned", 0)])
    }

    /// An inheriting, non-superuser role with no per-role configuration
    pub fn role(name: &str, can_login: bool) -> RoleInfo {
        RoleInfo {
            name: name.to_string(),
            can_login,
            is_superuser: false,
            inherits: true,
            config: Vec::new(),
        }
    }

    /// The catalog row [`fetch_role`](crate::catalog::fetch_role) expects
    pub fn role_row(role: &RoleInfo) -> Row {
        Row::from_pairs([
            ("name", Value::Text(role.name.clone())),
            ("can_login", Value::Bool(role.can_login)),
            ("is_superuser", Value::Bool(role.is_superuser)),
            ("inherits", Value::Bool(role.inherits)),
            ("config", Value::TextArray(role.config.clone())),
        ])
    }

    // ------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------

    /// Answer `sql` (with parameters starting with `params`) with `rows`.
    /// Later registrations take precedence.
    pub fn on_query(self, sql: &'static str, params: &[&str], rows: Vec<Row>) -> Self {
        self.script(sql, params, vec![Ok(rows)])
    }

    /// Answer successive matching calls with successive results; the last
    /// result repeats.
    pub fn script(self, sql: &'static str, params: &[&str], results: Vec<QueryResult>) -> Self {
        self.responders.lock().push(Responder {
            sql,
            params: params.iter().map(|p| p.to_string()).collect(),
            results: results.into(),
        });
        self
    }

    /// Fail matching queries with `err`
    pub fn fail_query(self, sql: &'static str, params: &[&str], err: SqlError) -> Self {
        self.script(sql, params, vec![Err(err)])
    }

    /// Fail the next batch containing `fragment` with `err`. Failed batches
    /// are not recorded, mirroring the server rolling them back.
    pub fn fail_batch(self, fragment: &str, err: SqlError) -> Self {
        self.batch_failures.lock().push((fragment.to_string(), err));
        self
    }

    /// Report the admin principal as `role`
    pub fn with_admin(self, role: RoleInfo) -> Self {
        let row = Self::role_row(&role);
        self.on_query(sql::CURRENT_PRINCIPAL, &[], vec![row])
    }

    /// Report the admin principal as a superuser
    pub fn with_superuser_admin(self) -> Self {
        self.with_admin(RoleInfo {
            is_superuser: true,
            ..Self::role(MOCK_ADMIN, true)
        })
    }

    /// Make `role` present in the catalog
    pub fn with_role(self, role: RoleInfo) -> Self {
        let row = Self::role_row(&role);
        self.on_query(sql::ROLE_BY_NAME, &[role.name.as_str()], vec![row])
    }

    /// Successive lookups of `name` see successive states (`None` = absent)
    pub fn with_role_sequence(self, name: &str, states: Vec<Option<RoleInfo>>) -> Self {
        let results = states
            .iter()
            .map(|state| Ok(state.iter().map(Self::role_row).collect()))
            .collect();
        self.script(sql::ROLE_BY_NAME, &[name], results)
    }

    /// Make `member` a direct member of `group`
    pub fn with_direct_member(self, group: &str, member: &str) -> Self {
        self.on_query(
            sql::DIRECT_MEMBERSHIP,
            &[group, member],
            vec![bool_row("present", true)],
        )
        .on_query(sql::HAS_ROLE, &[member, group], vec![bool_row("granted", true)])
    }

    /// List `members` as the direct members of `group`
    pub fn with_members(self, group: &str, members: Vec<RoleMember>) -> Self {
        let rows = members
            .into_iter()
            .map(|m| {
                Row::from_pairs([
                    ("name", Value::Text(m.name)),
                    ("can_login", Value::Bool(m.can_login)),
                ])
            })
            .collect();
        self.on_query(sql::DIRECT_MEMBERS, &[group], rows)
    }

    /// Whether the admin principal already holds the privileges of `role`
    pub fn with_current_user_privilege(self, role: &str, granted: bool) -> Self {
        self.on_query(
            sql::CURRENT_USER_HAS_ROLE,
            &[role],
            vec![bool_row("granted", granted)],
        )
    }

    /// Report `count` objects owned by `role`
    pub fn with_owned_objects(self, role: &str, count: i64) -> Self {
        self.on_query(sql::OWNED_OBJECT_COUNT, &[role], vec![int_row("owned", count)])
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Batches that executed successfully, in order
    pub fn batches(&self) -> Vec<String> {
        self.batches.lock().clone()
    }

    /// All successful batches joined by newlines
    pub fn executed_sql(&self) -> String {
        self.batches.lock().join("\n")
    }

    /// Every query issued, with its parameters
    pub fn queries(&self) -> Vec<(String, Vec<String>)> {
        self.queries.lock().clone()
    }

    /// Whether any query mentioned `param` as a parameter
    pub fn probed(&self, param: &str) -> bool {
        self.queries
            .lock()
            .iter()
            .any(|(_, params)| params.iter().any(|p| p == param))
    }
}

#[async_trait]
impl SqlSession for MockSession {
    async fn batch_execute(&self, sql: &str) -> Result<(), SqlError> {
        {
            let mut failures = self.batch_failures.lock();
            if let Some(idx) = failures.iter().position(|(frag, _)| sql.contains(frag.as_str())) {
                let (_, err) = failures.remove(idx);
                return Err(err);
            }
        }
        self.batches.lock().push(sql.to_string());
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<Row>, SqlError> {
        self.queries.lock().push((
            sql.to_string(),
            params.iter().map(|p| p.to_string()).collect(),
        ));
        let mut responders = self.responders.lock();
        match responders
            .iter_mut()
            .rev()
            .find(|r| r.matches(sql, params))
        {
            Some(responder) => responder.next(),
            None => Err(SqlError::protocol(format!("unexpected query: {sql}"))),
        }
    }
}

fn bool_row(column: &str, value: bool) -> Row {
    Row::from_pairs([(column, Value::Bool(value))])
}

fn int_row(column: &str, value: i64) -> Row {
    Row::from_pairs([(column, Value::Int(value))])
}

// ============================================================================
// Mock factory
// ============================================================================

/// A [`SessionFactory`] handing out one shared [`MockSession`]
#[derive(Debug)]
pub struct MockSessionFactory {
    session: Arc<MockSession>,
    connects: AtomicUsize,
    failure: Mutex<Option<ConnectionError>>,
}

impl MockSessionFactory {
    /// Wrap `session`
    pub fn new(session: MockSession) -> Self {
        Self {
            session: Arc::new(session),
            connects: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    /// Fail the next connect with `err`
    pub fn fail_next_connect(self, err: ConnectionError) -> Self {
        *self.failure.lock() = Some(err);
        self
    }

    /// The shared session
    pub fn session(&self) -> &MockSession {
        &self.session
    }

    /// Number of successful connects
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of sessions still alive outside the factory
    pub fn open_sessions(&self) -> usize {
        Arc::strong_count(&self.session) - 1
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    type Session = Arc<MockSession>;

    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<MockSession>, ConnectionError> {
        config.validate()?;
        if let Some(err) = self.failure.lock().take() {
            return Err(err);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.session))
    }
}
