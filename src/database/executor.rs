use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::database::audit::AuditLog;
use crate::database::session::Connection;
use crate::error::ProvisionError;

/// How a failed step affects the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Structural: the run aborts
    Critical,
    /// Degrades access but not structure: logged and skipped unless halting on error
    Advisory,
}

/// One DDL/DCL statement with its failure policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub sql: String,
    pub criticality: Criticality,
}

impl Step {
    pub fn critical(name: &'static str, sql: impl Into<String>) -> Self {
        Self {
            name,
            sql: sql.into(),
            criticality: Criticality::Critical,
        }
    }

    pub fn advisory(name: &'static str, sql: impl Into<String>) -> Self {
        Self {
            name,
            sql: sql.into(),
            criticality: Criticality::Advisory,
        }
    }

    /// Statement text safe for logs: password literals are masked
    pub fn redacted_sql(&self) -> String {
        match self.sql.find(" PASSWORD '") {
            Some(at) => format!("{} PASSWORD '***';", &self.sql[..at]),
            None => self.sql.clone(),
        }
    }
}

/// Result of a step that did not abort the run
#[derive(Debug)]
pub enum StepOutcome {
    Applied(u64),
    Skipped(ProvisionError),
}

/// Advisory failures collected over one provisioning run
#[derive(Debug, Default)]
pub struct Journal {
    skipped: Vec<ProvisionError>,
}

impl Journal {
    /// Returns whether the step was applied
    pub fn record(&mut self, outcome: StepOutcome) -> bool {
        match outcome {
            StepOutcome::Applied(_) => true,
            StepOutcome::Skipped(err) => {
                self.skipped.push(err);
                false
            }
        }
    }

    pub fn skipped(&self) -> &[ProvisionError] {
        &self.skipped
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn into_skipped(self) -> Vec<ProvisionError> {
        self.skipped
    }
}

/// Runs steps, mirrors them to the audit transcript and applies the halt-on-error policy
#[derive(Debug, Clone, Default)]
pub struct StatementExecutor {
    halt_on_error: bool,
    audit: Option<Arc<AuditLog>>,
}

impl StatementExecutor {
    pub fn new(halt_on_error: bool, audit: Option<Arc<AuditLog>>) -> Self {
        Self { halt_on_error, audit }
    }

    /// Same audit sink, never halting. Used for cleanup after a fatal error.
    pub fn lenient(&self) -> Self {
        Self {
            halt_on_error: false,
            audit: self.audit.clone(),
        }
    }

    /// Execute `step` on `conn`.
    ///
    /// Returns `Err` when the step failed and is critical or the executor halts on
    /// error; advisory failures otherwise come back as [`StepOutcome::Skipped`].
    pub async fn run<C: Connection>(
        &self,
        conn: &mut C,
        step: &Step,
    ) -> Result<StepOutcome, ProvisionError> {
        debug!("[{}] {}", conn.database(), step.redacted_sql());

        let result = conn.execute(&step.sql).await;

        if let Some(audit) = &self.audit {
            audit.statement(&step.sql);
        }

        match result {
            Ok(rows) => Ok(StepOutcome::Applied(rows)),
            Err(source) => {
                let err = ProvisionError::Statement {
                    step: step.name,
                    sql: step.redacted_sql(),
                    source,
                };
                self.settle(step.criticality, err)
            }
        }
    }

    /// Apply the failure policy to an error raised outside a statement (probes, sinks)
    pub fn settle(
        &self,
        criticality: Criticality,
        err: ProvisionError,
    ) -> Result<StepOutcome, ProvisionError> {
        if criticality == Criticality::Critical || self.halt_on_error || err.is_connectivity() {
            error!("{}", err);
            return Err(err);
        }

        warn!("Continuing after error: {}", err);
        Ok(StepOutcome::Skipped(err))
    }
}
