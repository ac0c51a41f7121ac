// Provisioning error taxonomy
use thiserror::Error;

/// Errors raised while provisioning or tearing down tenant objects
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("unable to connect to database {database}: {source}")]
    Connect {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("{step} failed: {source}\nwith sql:\n{sql}")]
    Statement {
        step: &'static str,
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("unable to check whether {kind} '{name}' exists: {source}")]
    Probe {
        kind: &'static str,
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("unable to generate random password: {0}")]
    Entropy(#[from] rand::Error),

    #[error("unable to write tenant credentials: {0}")]
    CredentialSink(#[from] SinkError),

    #[error("unable to open audit file {path}: {source}")]
    Audit {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while handing credentials to their sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("unable to marshal tenant users data: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unable to write tenant users data: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Connectivity failures abort the run even in best-effort mode
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ProvisionError::Connect { .. })
    }

    /// The statement text attached to a failed step, if any
    pub fn sql(&self) -> Option<&str> {
        match self {
            ProvisionError::Statement { sql, .. } => Some(sql),
            _ => None,
        }
    }
}
