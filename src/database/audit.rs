use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::credentials::{owner_only, restrict_permissions};
use crate::error::ProvisionError;

/// Append-only transcript of every statement sent to the server, in execution order
pub struct AuditLog {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl AuditLog {
    /// Truncate (or create, mode 0600) the transcript file for this process
    pub fn create(path: &Path) -> Result<Self, ProvisionError> {
        let audit_error = |source| ProvisionError::Audit {
            path: path.display().to_string(),
            source,
        };

        let file = owner_only(OpenOptions::new().write(true).create(true).truncate(true))
            .open(path)
            .map_err(audit_error)?;
        restrict_permissions(path).map_err(audit_error)?;

        Ok(Self::from_writer(file))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Append one executed statement verbatim
    pub fn statement(&self, sql: &str) {
        self.append(sql);
    }

    /// Append a `-- ` comment line (connect/disconnect markers)
    pub fn marker(&self, text: &str) {
        self.append(&format!("-- {text}"));
    }

    fn append(&self, line: &str) {
        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            tracing::warn!("Failed to append to audit file: {}", e);
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}
