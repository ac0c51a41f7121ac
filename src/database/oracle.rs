use tracing::error;

use crate::database::session::Connection;
use crate::error::ProvisionError;

pub const ROLE_EXISTS: &str = "SELECT 1 FROM pg_roles WHERE rolname = $1";
pub const DATABASE_EXISTS: &str = "SELECT 1 FROM pg_database WHERE datname = $1";

/// Whether a role named `name` exists right now. Never cached.
pub async fn role_exists<C: Connection>(conn: &mut C, name: &str) -> Result<bool, ProvisionError> {
    probe(conn, ROLE_EXISTS, "role", name).await
}

/// Whether a database named `name` exists right now. Never cached.
pub async fn database_exists<C: Connection>(conn: &mut C, name: &str) -> Result<bool, ProvisionError> {
    probe(conn, DATABASE_EXISTS, "database", name).await
}

async fn probe<C: Connection>(
    conn: &mut C,
    query: &str,
    kind: &'static str,
    name: &str,
) -> Result<bool, ProvisionError> {
    conn.exists(query, name).await.map_err(|source| {
        error!("Existence check for {} '{}' failed: {}", kind, name, source);
        ProvisionError::Probe {
            kind,
            name: name.to_string(),
            source,
        }
    })
}
