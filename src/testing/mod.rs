//! In-memory stand-in for a PostgreSQL cluster.
//!
//! Interprets the statements the provisioner emits closely enough to check
//! ordering, idempotence and teardown safety without a live server.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::database::oracle::{DATABASE_EXISTS, ROLE_EXISTS};
use crate::database::session::{Cluster, Connection, SessionScope};
use crate::error::ProvisionError;

pub const OPERATOR: &str = "postgres";

/// One statement as the server received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub database: String,
    pub role: String,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleState {
    pub login: bool,
    pub member_of: BTreeSet<String>,
}

/// Server state that survives across runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub roles: BTreeMap<String, RoleState>,
    /// database -> owner
    pub databases: BTreeMap<String, String>,
    /// (database, schema)
    pub schemas: BTreeSet<(String, String)>,
    /// `db.schema.name` -> owner
    pub objects: BTreeMap<String, String>,
    /// (database, statement) for grants, revokes and default privileges
    pub grants: BTreeSet<(String, String)>,
}

#[derive(Default)]
struct State {
    snapshot: Snapshot,
    log: Vec<Executed>,
    failures: Vec<String>,
    opened: Vec<SessionScope>,
    released: usize,
}

#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        let cluster = Self {
            state: Arc::new(Mutex::new(State::default())),
        };
        cluster.with_role(OPERATOR).with_database(OPERATOR, OPERATOR)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn with_role(self, name: &str) -> Self {
        self.lock().snapshot.roles.insert(
            name.to_string(),
            RoleState {
                login: false,
                member_of: BTreeSet::new(),
            },
        );
        self
    }

    pub fn with_database(self, name: &str, owner: &str) -> Self {
        self.lock().snapshot.databases.insert(name.to_string(), owner.to_string());
        self
    }

    pub fn with_object(self, path: &str, owner: &str) -> Self {
        self.lock().snapshot.objects.insert(path.to_string(), owner.to_string());
        self
    }

    /// Fail every statement or probe containing `pattern`
    pub fn fail_on(self, pattern: &str) -> Self {
        self.lock().failures.push(pattern.to_string());
        self
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot.clone()
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.lock().log.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().log.iter().map(|e| e.sql.clone()).collect()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    pub fn opened(&self) -> Vec<SessionScope> {
        self.lock().opened.clone()
    }

    pub fn released(&self) -> usize {
        self.lock().released
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    type Conn = FakeConnection;

    fn operator_role(&self) -> &str {
        OPERATOR
    }

    async fn open(&self, scope: &SessionScope) -> Result<FakeConnection, ProvisionError> {
        let database = scope
            .database
            .as_ref()
            .map_or_else(|| OPERATOR.to_string(), |d| d.to_string());

        {
            let mut state = self.lock();
            state.opened.push(scope.clone());
            if !state.snapshot.databases.contains_key(&database) {
                return Err(ProvisionError::Connect {
                    database: database.clone(),
                    source: sqlx::Error::Protocol(format!("database \"{database}\" does not exist")),
                });
            }
        }

        let mut conn = FakeConnection {
            state: self.state.clone(),
            database,
            role: OPERATOR.to_string(),
            scoped_role: scope.role.is_some(),
        };

        if let Some(role) = &scope.role {
            conn.execute(&format!("SET ROLE {};", role.quoted()))
                .await
                .map_err(|source| ProvisionError::Connect {
                    database: conn.database.clone(),
                    source,
                })?;
        }

        Ok(conn)
    }
}

pub struct FakeConnection {
    state: Arc<Mutex<State>>,
    database: String,
    role: String,
    scoped_role: bool,
}

#[async_trait]
impl Connection for FakeConnection {
    fn database(&self) -> &str {
        &self.database
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        state.log.push(Executed {
            database: self.database.clone(),
            role: self.role.clone(),
            sql: sql.to_string(),
        });

        if state.failures.iter().any(|p| sql.contains(p.as_str())) {
            return Err(injected(sql));
        }

        let database = self.database.clone();
        apply(&mut state.snapshot, &database, &mut self.role, sql)
            .map_err(sqlx::Error::Protocol)?;
        Ok(0)
    }

    async fn exists(&mut self, query: &str, name: &str) -> Result<bool, sqlx::Error> {
        let state = self.state.lock().unwrap();
        if state.failures.iter().any(|p| query.contains(p.as_str())) {
            return Err(injected(query));
        }

        match query {
            ROLE_EXISTS => Ok(state.snapshot.roles.contains_key(name)),
            DATABASE_EXISTS => Ok(state.snapshot.databases.contains_key(name)),
            other => Err(sqlx::Error::Protocol(format!("unexpected probe: {other}"))),
        }
    }

    async fn release(mut self) {
        if self.scoped_role {
            let _ = self.execute("RESET ROLE;").await;
        }
        self.state.lock().unwrap().released += 1;
    }
}

fn injected(sql: &str) -> sqlx::Error {
    sqlx::Error::Protocol(format!("injected failure for: {sql}"))
}

/// Pull the first double-quoted identifier after `keyword`
fn ident_after(sql: &str, keyword: &str) -> Option<String> {
    let rest = &sql[sql.find(keyword)? + keyword.len()..];
    let start = rest.find('"')? + 1;
    let end = start + rest[start..].find('"')?;
    Some(rest[start..end].to_string())
}

fn apply(db: &mut Snapshot, database: &str, current_role: &mut String, sql: &str) -> Result<(), String> {
    let sql = sql.trim_end_matches(';');
    let ident = |keyword: &str| ident_after(sql, keyword).ok_or_else(|| format!("cannot parse: {sql}"));

    if sql.starts_with("CREATE ROLE") {
        let name = ident("CREATE ROLE")?;
        if db.roles.contains_key(&name) {
            return Err(format!("role \"{name}\" already exists"));
        }
        let login = sql.contains("WITH LOGIN");
        db.roles.insert(name, RoleState { login, member_of: BTreeSet::new() });
    } else if sql.starts_with("DROP ROLE IF EXISTS") {
        let name = ident("DROP ROLE IF EXISTS")?;
        if db.objects.values().any(|owner| *owner == name) || db.databases.values().any(|owner| *owner == name) {
            return Err(format!("role \"{name}\" cannot be dropped because some objects depend on it"));
        }
        db.roles.remove(&name);
        for role in db.roles.values_mut() {
            role.member_of.remove(&name);
        }
        let quoted = format!("\"{name}\"");
        db.grants.retain(|(_, grant)| !grant.contains(&quoted));
    } else if sql.starts_with("REASSIGN OWNED BY") {
        // Local objects of the current database, plus shared objects (databases)
        let from = ident("REASSIGN OWNED BY")?;
        let to = ident(" TO ")?;
        let prefix = format!("{database}.");
        let local = db
            .objects
            .iter_mut()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(_, owner)| owner);
        for owner in local.chain(db.databases.values_mut()) {
            if *owner == from {
                *owner = to.clone();
            }
        }
    } else if sql.starts_with("DROP OWNED BY") {
        let name = ident("DROP OWNED BY")?;
        if *current_role != name && *current_role != OPERATOR {
            return Err(format!("permission denied to drop objects of \"{name}\""));
        }
        let prefix = format!("{database}.");
        db.objects.retain(|path, owner| !(path.starts_with(&prefix) && *owner == name));
        let quoted = format!("\"{name}\"");
        db.grants.retain(|(d, grant)| {
            let visible = d == database || grant.contains("ON DATABASE");
            !(visible && grant.contains(&quoted))
        });
    } else if sql.starts_with("SET ROLE") {
        let name = ident("SET ROLE")?;
        if !db.roles.contains_key(&name) {
            return Err(format!("role \"{name}\" does not exist"));
        }
        *current_role = name;
    } else if sql == "RESET ROLE" {
        *current_role = OPERATOR.to_string();
    } else if sql.starts_with("CREATE DATABASE") {
        let name = ident("CREATE DATABASE")?;
        if db.databases.contains_key(&name) {
            return Err(format!("database \"{name}\" already exists"));
        }
        db.databases.insert(name, current_role.clone());
    } else if sql.starts_with("ALTER DATABASE") {
        let name = ident("ALTER DATABASE")?;
        let owner = ident("OWNER TO")?;
        if !db.roles.contains_key(&owner) {
            return Err(format!("role \"{owner}\" does not exist"));
        }
        match db.databases.get_mut(&name) {
            Some(current) => *current = owner,
            None => return Err(format!("database \"{name}\" does not exist")),
        }
    } else if sql.starts_with("DROP DATABASE IF EXISTS") {
        let name = ident("DROP DATABASE IF EXISTS")?;
        db.databases.remove(&name);
        db.schemas.retain(|(d, _)| *d != name);
        let prefix = format!("{name}.");
        db.objects.retain(|path, _| !path.starts_with(&prefix));
        db.grants.retain(|(d, _)| *d != name);
    } else if sql.starts_with("CREATE SCHEMA") {
        let name = ident("CREATE SCHEMA")?;
        if !db.schemas.insert((database.to_string(), name.clone())) {
            return Err(format!("schema \"{name}\" already exists"));
        }
    } else if sql.starts_with("DROP SCHEMA IF EXISTS") {
        let name = ident("DROP SCHEMA IF EXISTS")?;
        db.schemas.remove(&(database.to_string(), name.clone()));
        let prefix = format!("{database}.{name}.");
        db.objects.retain(|path, _| !path.starts_with(&prefix));
        let quoted = format!("SCHEMA \"{name}\"");
        db.grants.retain(|(d, grant)| !(d == database && grant.contains(&quoted)));
    } else if sql.starts_with("GRANT \"") {
        let group = ident("GRANT")?;
        let user = ident(" TO ")?;
        if !db.roles.contains_key(&group) {
            return Err(format!("role \"{group}\" does not exist"));
        }
        match db.roles.get_mut(&user) {
            Some(role) => {
                role.member_of.insert(group);
            }
            None => return Err(format!("role \"{user}\" does not exist")),
        }
    } else if sql.starts_with("GRANT") || sql.starts_with("REVOKE") || sql.starts_with("ALTER DEFAULT PRIVILEGES") {
        db.grants.insert((database.to_string(), sql.to_string()));
    } else {
        return Err(format!("unsupported statement: {sql}"));
    }

    Ok(())
}

/// Cloneable in-memory writer for capturing audit output
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_rejects_dropping_a_role_that_still_owns_objects() {
        let cluster = FakeCluster::new()
            .with_role("acme_rw_usr")
            .with_object("postgres.public.t", "acme_rw_usr");
        let mut conn = cluster.open(&SessionScope::root()).await.unwrap();

        assert!(conn.execute("DROP ROLE IF EXISTS \"acme_rw_usr\";").await.is_err());
        conn.execute("REASSIGN OWNED BY \"acme_rw_usr\" TO \"postgres\";").await.unwrap();
        conn.execute("DROP ROLE IF EXISTS \"acme_rw_usr\";").await.unwrap();
        assert!(!cluster.snapshot().roles.contains_key("acme_rw_usr"));
    }

    #[tokio::test]
    async fn fake_reassigns_only_within_the_connected_database() {
        let cluster = FakeCluster::new()
            .with_role("acme_rw_usr")
            .with_database("acme", OPERATOR)
            .with_object("acme.public.notes", "acme_rw_usr");
        let mut conn = cluster.open(&SessionScope::root()).await.unwrap();

        conn.execute("REASSIGN OWNED BY \"acme_rw_usr\" TO \"postgres\";").await.unwrap();
        conn.execute("DROP OWNED BY \"acme_rw_usr\";").await.unwrap();
        assert_eq!(
            cluster.snapshot().objects.get("acme.public.notes").map(String::as_str),
            Some("acme_rw_usr")
        );
        assert!(conn.execute("DROP ROLE IF EXISTS \"acme_rw_usr\";").await.is_err());
    }

    #[tokio::test]
    async fn fake_refuses_connections_to_missing_databases() {
        let cluster = FakeCluster::new();
        let scope = SessionScope::database(crate::identity::Identifier::new("nowhere").unwrap());
        assert!(matches!(cluster.open(&scope).await, Err(ProvisionError::Connect { .. })));
    }
}
