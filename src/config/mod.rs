use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::credentials::{CredentialSink, FileCredentialSink, PasswordConfig};
use crate::database::audit::AuditLog;
use crate::error::ProvisionError;
use crate::provision::ProvisionOptions;

/// Everything one invocation needs beyond its positional inputs.
///
/// Built once from parsed arguments and handed down explicitly; nothing reads
/// the environment after startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub halt_on_error: bool,
    /// SQL transcript destination
    pub audit_file: Option<PathBuf>,
    /// JSON destination for the generated credentials
    pub credentials_file: Option<PathBuf>,
    pub password: PasswordConfig,
}

impl RunConfig {
    /// Letters and digits, optionally widened with specials minus `exclude`
    pub fn password_policy(length: Option<usize>, special: bool, exclude: Option<String>) -> PasswordConfig {
        PasswordConfig {
            length,
            use_letters: true,
            use_digits: true,
            use_special: special,
            exclude: exclude.unwrap_or_default(),
        }
    }

    /// Open the sinks and build orchestrator options.
    ///
    /// The audit file is truncated here, once per process; everything after appends.
    pub fn into_options(self) -> Result<ProvisionOptions, ProvisionError> {
        let audit = match &self.audit_file {
            Some(path) => Some(Arc::new(AuditLog::create(path)?)),
            None => None,
        };

        let credentials = self
            .credentials_file
            .map(|path| Box::new(FileCredentialSink::new(path)) as Box<dyn CredentialSink>);

        Ok(ProvisionOptions {
            halt_on_error: self.halt_on_error,
            audit,
            credentials,
            password: self.password,
        })
    }
}
