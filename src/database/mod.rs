pub mod audit;
pub mod executor;
pub mod oracle;
pub mod session;
pub mod teardown;

pub use audit::AuditLog;
pub use executor::{Criticality, Journal, StatementExecutor, Step, StepOutcome};
pub use session::{Cluster, Connection, PgSession, ScopedConnection, SessionScope};
