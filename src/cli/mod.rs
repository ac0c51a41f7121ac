pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "pg-tenant-setup")]
#[command(about = "Provision PostgreSQL tenant databases and schemas with tiered roles")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Create (or recreate) a tenant database and its owner role")]
    CreateDatabase(commands::database::CreateDatabaseArgs),

    #[command(about = "Create (or recreate) a tenant schema with admin, read-write and read-only roles")]
    CreateSchema(commands::schema::CreateSchemaArgs),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::CreateDatabase(args) => commands::database::handle(args, output_format).await,
        Commands::CreateSchema(args) => commands::schema::handle(args, output_format).await,
    }
}
