use clap::Args;

use super::CommonArgs;
use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::database::PgSession;
use crate::provision::Provisioner;

#[derive(Args, Debug, Clone)]
pub struct CreateDatabaseArgs {
    #[arg(short = 'd', long, help = "Tenant database to create")]
    pub database_name: String,

    #[arg(long, help = "Tenant key for role names (defaults to the database name)")]
    pub tenant_name: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

pub async fn handle(args: CreateDatabaseArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let connection_string = args.common.connection_string()?;
    let options = args.common.run_config().into_options()?;
    let session = PgSession::connect(&connection_string, options.audit.clone()).await?;

    let result = Provisioner::new(&session, options)
        .provision_database(&args.database_name, args.tenant_name.as_deref())
        .await;
    session.close().await;
    let report = result?;

    output_success(
        &output_format,
        &format!("Database '{}' provisioned", report.database),
        Some(serde_json::to_value(&report)?),
    )?;
    output_fields(
        &output_format,
        &[("tenant", report.tenant.as_str()), ("owner", report.owner.as_str())],
    );
    output_skipped(&output_format, &report.skipped);

    Ok(())
}
