use clap::Args;

use super::CommonArgs;
use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::database::PgSession;
use crate::identity::Tier;
use crate::provision::{Provisioner, SchemaRequest};

#[derive(Args, Debug, Clone)]
pub struct CreateSchemaArgs {
    #[arg(short = 'd', long, help = "Database that holds the schema")]
    pub database_name: String,

    #[arg(short = 's', long, help = "Schema to create")]
    pub schema_name: String,

    #[arg(long, help = "Tenant key for role names (defaults to the database name)")]
    pub tenant_name: Option<String>,

    #[arg(long, help = "Role to act as inside the database (defaults to the tenant owner)")]
    pub role: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

pub async fn handle(args: CreateSchemaArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let connection_string = args.common.connection_string()?;
    let options = args.common.run_config().into_options()?;
    let session = PgSession::connect(&connection_string, options.audit.clone()).await?;

    let request = SchemaRequest {
        schema: &args.schema_name,
        database: &args.database_name,
        tenant: args.tenant_name.as_deref(),
        role: args.role.as_deref(),
    };
    let result = Provisioner::new(&session, options).provision_schema(request).await;
    session.close().await;
    let report = result?;

    output_success(
        &output_format,
        &format!("Schema '{}' provisioned in database '{}'", report.names.schema, report.database),
        Some(serde_json::to_value(&report)?),
    )?;

    let mut fields = vec![("acting role", report.acting_role.as_str())];
    for tier in Tier::ALL {
        fields.push((tier.label(), report.names.users.get(tier).as_str()));
    }
    output_fields(&output_format, &fields);

    if !report.credentials_written {
        if let OutputFormat::Text = output_format {
            println!("! No credentials file configured; generated passwords were not saved");
        }
    }
    if let OutputFormat::Text = output_format {
        for user in &report.unissued {
            println!("! Login role {} was not recreated; no credentials were issued for it", user);
        }
    }
    output_skipped(&output_format, &report.skipped);

    Ok(())
}
