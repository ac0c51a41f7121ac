pub mod database;
pub mod schema;

use clap::builder::FalseyValueParser;
use clap::Args;
use std::path::PathBuf;

use crate::config::RunConfig;
use crate::error::ProvisionError;

/// Options shared by every provisioning command
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(
        short = 'c',
        long,
        env = "PG_TENANT_SETUP_CONNECTION_STRING",
        help = "Operator connection string (falls back to DATABASE_URL)"
    )]
    pub connection_string: Option<String>,

    #[arg(long, env = "PG_TENANT_SETUP_OUTPUT_SQL_FILE", help = "Write every executed statement to this file")]
    pub output_sql_file: Option<PathBuf>,

    #[arg(
        long,
        env = "PG_TENANT_SETUP_HALT_ON_ERROR",
        value_parser = FalseyValueParser::new(),
        help = "Abort on the first failed statement"
    )]
    pub halt_on_error: bool,

    #[arg(
        long,
        env = "PG_TENANT_SETUP_OUTPUT_CREDENTIALS_FILE",
        help = "Write generated credentials as JSON to this file"
    )]
    pub output_credentials_file: Option<PathBuf>,

    #[arg(long, env = "PG_TENANT_SETUP_PASSWORD_LENGTH", help = "Generated password length [default: 32]")]
    pub password_length: Option<usize>,

    #[arg(
        long,
        env = "PG_TENANT_SETUP_PASSWORD_SPECIAL",
        value_parser = FalseyValueParser::new(),
        help = "Include special characters in passwords"
    )]
    pub password_special: bool,

    #[arg(long, env = "PG_TENANT_SETUP_PASSWORD_EXCLUDE", help = "Special characters to leave out of passwords")]
    pub password_exclude: Option<String>,
}

impl CommonArgs {
    pub fn connection_string(&self) -> Result<String, ProvisionError> {
        self.connection_string
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()))
            .ok_or(ProvisionError::ConfigMissing(
                "connection string (--connection-string, PG_TENANT_SETUP_CONNECTION_STRING or DATABASE_URL)",
            ))
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            halt_on_error: self.halt_on_error,
            audit_file: self.output_sql_file.clone(),
            credentials_file: self.output_credentials_file.clone(),
            password: RunConfig::password_policy(
                self.password_length,
                self.password_special,
                self.password_exclude.clone(),
            ),
        }
    }
}
