//! Read-only probes against the role catalogs.
//!
//! Every decision the registrar, reconciler and teardown coordinator make is
//! re-derived from these probes on each call; nothing is cached.

use crate::connection::SqlSession;
use crate::error::SqlError;
use crate::types::Row;

/// Catalog queries. Parameters are cast explicitly because `pg_has_role`
/// and friends are overloaded on `name`/`oid`.
pub mod sql {
    /// Role attributes by name. `$1` role.
    pub const ROLE_BY_NAME: &str = "SELECT r.rolname::text AS name, r.rolcanlogin AS can_login, \
         r.rolsuper AS is_superuser, r.rolinherit AS inherits, \
         COALESCE(r.rolconfig, ARRAY[]::text[]) AS config \
         FROM pg_catalog.pg_roles r WHERE r.rolname = $1::name";

    /// Attributes of the session's own principal.
    pub const CURRENT_PRINCIPAL: &str = "SELECT r.rolname::text AS name, r.rolcanlogin AS can_login, \
         r.rolsuper AS is_superuser, r.rolinherit AS inherits, \
         COALESCE(r.rolconfig, ARRAY[]::text[]) AS config \
         FROM pg_catalog.pg_roles r WHERE r.rolname = current_user";

    /// Whether `$2` is a direct member of `$1`.
    pub const DIRECT_MEMBERSHIP: &str = "SELECT EXISTS (\
         SELECT 1 FROM pg_catalog.pg_auth_members m \
         JOIN pg_catalog.pg_roles g ON g.oid = m.roleid \
         JOIN pg_catalog.pg_roles u ON u.oid = m.member \
         WHERE g.rolname = $1::name AND u.rolname = $2::name) AS present";

    /// Whether `$1` holds `$3` privilege (`MEMBER`, `USAGE`) on role `$2`.
    pub const HAS_ROLE: &str =
        "SELECT pg_catalog.pg_has_role($1::name, $2::name, $3::text) AS granted";

    /// Whether the session's principal holds `$2` privilege on role `$1`.
    pub const CURRENT_USER_HAS_ROLE: &str =
        "SELECT pg_catalog.pg_has_role(current_user, $1::name, $2::text) AS granted";

    /// Direct members of `$1`.
    /// A member granted by several grantors is listed once.
    pub const DIRECT_MEMBERS: &str = "SELECT DISTINCT u.rolname::text AS name, u.rolcanlogin AS can_login \
         FROM pg_catalog.pg_auth_members m \
         JOIN pg_catalog.pg_roles g ON g.oid = m.roleid \
         JOIN pg_catalog.pg_roles u ON u.oid = m.member \
         WHERE g.rolname = $1::name ORDER BY 1";

    /// Name of the connected database.
    pub const CURRENT_DATABASE: &str = "SELECT pg_catalog.current_database()::text AS name";

    /// Relations, schemas and routines owned by `$1` in the connected database.
    pub const OWNED_OBJECT_COUNT: &str = "SELECT \
         (SELECT count(*) FROM pg_catalog.pg_class c WHERE c.relowner = r.oid) + \
         (SELECT count(*) FROM pg_catalog.pg_namespace n WHERE n.nspowner = r.oid) + \
         (SELECT count(*) FROM pg_catalog.pg_proc p WHERE p.proowner = r.oid) AS owned \
         FROM pg_catalog.pg_roles r WHERE r.rolname = $1::name";
}

/// Role privilege kinds accepted by `pg_has_role`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolePrivilege {
    /// Direct or indirect membership
    Member,
    /// Membership whose privileges are usable without `SET ROLE`
    Usage,
}

impl RolePrivilege {
    fn as_str(self) -> &'static str {
        match self {
            RolePrivilege::Member => "MEMBER",
            RolePrivilege::Usage => "USAGE",
        }
    }
}

/// Attributes of a role as recorded in `pg_roles`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInfo {
    /// Role name
    pub name: String,
    /// `rolcanlogin`
    pub can_login: bool,
    /// `rolsuper`
    pub is_superuser: bool,
    /// `rolinherit`
    pub inherits: bool,
    /// Per-role configuration entries (`key=value`)
    pub config: Vec<String>,
}

impl RoleInfo {
    /// The role its sessions switch to at login (`role=<name>` in rolconfig)
    pub fn session_role(&self) -> Option<&str> {
        self.config
            .iter()
            .find_map(|entry| entry.strip_prefix("role="))
    }

    fn from_row(row: &Row) -> Result<Self, SqlError> {
        Ok(Self {
            name: required(row.get_str("name"), "name")?.to_string(),
            can_login: required(row.get_bool("can_login"), "can_login")?,
            is_superuser: required(row.get_bool("is_superuser"), "is_superuser")?,
            inherits: required(row.get_bool("inherits"), "inherits")?,
            config: required(row.get_text_array("config"), "config")?.to_vec(),
        })
    }
}

/// A direct member of a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMember {
    /// Member role name
    pub name: String,
    /// Whether the member can log in
    pub can_login: bool,
}

fn required<T>(value: Option<T>, column: &str) -> Result<T, SqlError> {
    value.ok_or_else(|| SqlError::protocol(format!("catalog row is missing column {column:?}")))
}

/// Look up a role by name.
pub async fn fetch_role(session: &dyn SqlSession, name: &str) -> Result<Option<RoleInfo>, SqlError> {
    session
        .query_opt(sql::ROLE_BY_NAME, &[name])
        .await?
        .as_ref()
        .map(RoleInfo::from_row)
        .transpose()
}

/// Attributes of the principal the session is authenticated as.
pub async fn current_principal(session: &dyn SqlSession) -> Result<RoleInfo, SqlError> {
    let row = session.query_one(sql::CURRENT_PRINCIPAL, &[]).await?;
    RoleInfo::from_row(&row)
}

/// Whether `member` is granted `group` directly (not through another role).
pub async fn is_direct_member(
    session: &dyn SqlSession,
    group: &str,
    member: &str,
) -> Result<bool, SqlError> {
    let row = session
        .query_one(sql::DIRECT_MEMBERSHIP, &[group, member])
        .await?;
    required(row.get_bool("present"), "present")
}

/// `pg_has_role(member, role, privilege)`
pub async fn has_role(
    session: &dyn SqlSession,
    member: &str,
    role: &str,
    privilege: RolePrivilege,
) -> Result<bool, SqlError> {
    let row = session
        .query_one(sql::HAS_ROLE, &[member, role, privilege.as_str()])
        .await?;
    required(row.get_bool("granted"), "granted")
}

/// `pg_has_role(current_user, role, privilege)`
pub async fn current_user_has_role(
    session: &dyn SqlSession,
    role: &str,
    privilege: RolePrivilege,
) -> Result<bool, SqlError> {
    let row = session
        .query_one(sql::CURRENT_USER_HAS_ROLE, &[role, privilege.as_str()])
        .await?;
    required(row.get_bool("granted"), "granted")
}

/// Direct members of `role`, ordered by name.
pub async fn direct_members(
    session: &dyn SqlSession,
    role: &str,
) -> Result<Vec<RoleMember>, SqlError> {
    session
        .query(sql::DIRECT_MEMBERS, &[role])
        .await?
        .iter()
        .map(|row| {
            Ok(RoleMember {
                name: required(row.get_str("name"), "name")?.to_string(),
                can_login: required(row.get_bool("can_login"), "can_login")?,
            })
        })
        .collect()
}

/// Name of the connected database.
pub async fn current_database(session: &dyn SqlSession) -> Result<String, SqlError> {
    let row = session.query_one(sql::CURRENT_DATABASE, &[]).await?;
    Ok(required(row.get_str("name"), "name")?.to_string())
}

/// Number of relations, schemas and routines `role` owns in this database.
/// Zero when the role does not exist.
pub async fn owned_object_count(session: &dyn SqlSession, role: &str) -> Result<i64, SqlError> {
    match session.query_opt(sql::OWNED_OBJECT_COUNT, &[role]).await? {
        Some(row) => required(row.get_i64("owned"), "owned"),
        None => Ok(0),
    }
}
