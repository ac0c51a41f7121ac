use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Postgres};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::audit::AuditLog;
use crate::error::ProvisionError;
use crate::identity::Identifier;

/// Database and role a connection is pinned to for its lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionScope {
    /// Defaults to the database of the operator's connection string
    pub database: Option<Identifier>,
    /// Activated with `SET ROLE` on connect and reset before the connection closes
    pub role: Option<Identifier>,
}

impl SessionScope {
    /// A connection from the operator's root pool
    pub fn root() -> Self {
        Self::default()
    }

    pub fn database(database: Identifier) -> Self {
        Self {
            database: Some(database),
            role: None,
        }
    }

    pub fn acting_as(mut self, role: Identifier) -> Self {
        self.role = Some(role);
        self
    }

    pub fn is_root(&self) -> bool {
        self.database.is_none() && self.role.is_none()
    }
}

/// A single live connection the executor can run statements on
#[async_trait]
pub trait Connection: Send + Sized {
    /// Database this connection is attached to
    fn database(&self) -> &str;

    /// Run one statement, returning the affected row count
    async fn execute(&mut self, sql: &str) -> Result<u64, sqlx::Error>;

    /// Run a single-row probe with `name` bound as `$1`; absence of a row is `false`
    async fn exists(&mut self, query: &str, name: &str) -> Result<bool, sqlx::Error>;

    /// Reset any activated role and give the connection back
    async fn release(self);
}

/// Source of connections against one database cluster
#[async_trait]
pub trait Cluster: Send + Sync {
    type Conn: Connection;

    /// Role the operator connected as; reassignment target during teardown
    fn operator_role(&self) -> &str;

    async fn open(&self, scope: &SessionScope) -> Result<Self::Conn, ProvisionError>;
}

/// Caller-owned root session: the operator's pool plus the means to mint scoped connections
pub struct PgSession {
    root: PgPool,
    url: url::Url,
    operator_role: String,
    audit: Option<Arc<AuditLog>>,
}

impl PgSession {
    /// Open the root pool, verify connectivity and record the operator's role
    pub async fn connect(
        connection_string: &str,
        audit: Option<Arc<AuditLog>>,
    ) -> Result<Self, ProvisionError> {
        let url = url::Url::parse(connection_string)
            .map_err(|e| ProvisionError::InvalidConnectionString(e.to_string()))?;
        let database = database_of(&url);
        let connect_error = |source| ProvisionError::Connect {
            database: database.clone(),
            source,
        };

        let root = PgPoolOptions::new()
            .after_release(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("RESET ROLE;").await?;
                    Ok(true)
                })
            })
            .connect(connection_string)
            .await
            .map_err(connect_error)?;

        sqlx::query("SELECT 1").execute(&root).await.map_err(connect_error)?;

        let operator_role: String = sqlx::query_scalar("SELECT current_user::text")
            .fetch_one(&root)
            .await
            .map_err(connect_error)?;

        info!("Connected to {} as {}", redact(&url), operator_role);

        Ok(Self {
            root,
            url,
            operator_role,
            audit,
        })
    }

    pub async fn close(&self) {
        self.root.close().await;
        debug!("Closed root pool for {}", redact(&self.url));
    }

    async fn open_private(&self, scope: &SessionScope) -> Result<ScopedConnection, ProvisionError> {
        let (connection_string, database) = match &scope.database {
            Some(db) => (build_connection_string(&self.url, db), db.to_string()),
            None => (self.url.to_string(), database_of(&self.url)),
        };
        let connect_error = |source| ProvisionError::Connect {
            database: database.clone(),
            source,
        };

        if let Some(audit) = &self.audit {
            audit.marker(&format!("connecting to database {database}"));
        }

        let mut options = PgPoolOptions::new().max_connections(1).min_connections(1);

        if let Some(role) = &scope.role {
            let set_role = format!("SET ROLE {};", role.quoted());
            let audit = self.audit.clone();
            options = options.after_connect(move |conn, _meta| {
                let set_role = set_role.clone();
                let audit = audit.clone();
                Box::pin(async move {
                    let result = conn.execute(set_role.as_str()).await;
                    if let Some(audit) = &audit {
                        audit.statement(&set_role);
                    }
                    result?;
                    Ok(())
                })
            });
        }

        let pool = options.connect(&connection_string).await.map_err(connect_error)?;
        let conn = pool.acquire().await.map_err(connect_error)?;

        debug!(
            "Opened scoped connection to {} as {}",
            database,
            scope.role.as_ref().map_or(self.operator_role.as_str(), |r| r.as_str())
        );

        Ok(ScopedConnection {
            conn,
            pool: Some(pool),
            database,
            role: scope.role.clone(),
            audit: self.audit.clone(),
        })
    }
}

#[async_trait]
impl Cluster for PgSession {
    type Conn = ScopedConnection;

    fn operator_role(&self) -> &str {
        &self.operator_role
    }

    async fn open(&self, scope: &SessionScope) -> Result<ScopedConnection, ProvisionError> {
        if !scope.is_root() {
            return self.open_private(scope).await;
        }

        let database = database_of(&self.url);
        let conn = self.root.acquire().await.map_err(|source| ProvisionError::Connect {
            database: database.clone(),
            source,
        })?;

        Ok(ScopedConnection {
            conn,
            pool: None,
            database,
            role: None,
            audit: self.audit.clone(),
        })
    }
}

/// One connection held for a single provisioning phase.
///
/// Scoped pools hold exactly one connection and are closed on release. Dropping
/// without `release` still returns the connection to its pool, where the root
/// pool's release hook resets the role.
pub struct ScopedConnection {
    conn: PoolConnection<Postgres>,
    pool: Option<PgPool>,
    database: String,
    role: Option<Identifier>,
    audit: Option<Arc<AuditLog>>,
}

#[async_trait]
impl Connection for ScopedConnection {
    fn database(&self) -> &str {
        &self.database
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        let result = (&mut *self.conn).execute(sql).await?;
        Ok(result.rows_affected())
    }

    async fn exists(&mut self, query: &str, name: &str) -> Result<bool, sqlx::Error> {
        let row: Option<i32> = sqlx::query_scalar(query)
            .bind(name)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.is_some())
    }

    async fn release(mut self) {
        if self.role.is_some() {
            let reset = "RESET ROLE;";
            let result = (&mut *self.conn).execute(reset).await;
            if let Some(audit) = &self.audit {
                audit.statement(reset);
            }
            if let Err(e) = result {
                warn!("Failed to reset role on {}: {}", self.database, e);
            }
        }

        let ScopedConnection {
            conn,
            pool,
            database,
            audit,
            ..
        } = self;
        drop(conn);

        if let Some(pool) = pool {
            pool.close().await;
            if let Some(audit) = &audit {
                audit.marker(&format!("closing connection to database {database}"));
            }
            debug!("Closed scoped connection to {}", database);
        }
    }
}

/// Swap the database in the operator's connection string, keeping credentials and parameters
fn build_connection_string(url: &url::Url, database: &Identifier) -> String {
    let mut url = url.clone();
    url.set_path(&format!("/{}", database));
    url.into()
}

/// Database named by the connection string path, or the user name as libpq defaults it
fn database_of(url: &url::Url) -> String {
    let path = url.path().trim_start_matches('/');
    if path.is_empty() {
        url.username().to_string()
    } else {
        path.to_string()
    }
}

/// Connection string with the password removed, for logs
pub fn redact(url: &url::Url) -> String {
    let mut url = url.clone();
    if url.password().is_some() {
        let _ = url.set_password(Some("***"));
    }
    url.into()
}
