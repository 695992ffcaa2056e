//! strata-migrate CLI
//!
//! Command-line front end for the migration engine.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{Level, info};

use strata_migrate::prelude::*;

/// Version-ordered SQL schema migrations.
#[derive(Parser)]
#[command(name = "strata-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database connection string.
    #[arg(long, short, env = "DATABASE_URL", default_value = "sqlite:strata.db?mode=rwc")]
    database: String,

    /// Database driver (sqlite, postgres, ...).
    #[arg(long, default_value = "sqlite")]
    driver: String,

    /// Directories containing migration scripts.
    #[arg(short, long, default_value = "Sql_Scripts")]
    locations: Vec<PathBuf>,

    /// Schemas managed by the engine; defaults to the connection's schema.
    #[arg(short, long)]
    schemas: Vec<String>,

    /// Schema holding the ledger table; defaults to the first managed schema.
    #[arg(long)]
    metadata_schema: Option<String>,

    /// Name of the ledger table.
    #[arg(long, default_value = "changelog")]
    metadata_table: String,

    /// KEY=VALUE pairs substituted into script bodies.
    #[arg(short, long = "placeholder", value_name = "KEY=VALUE")]
    placeholders: Vec<String>,

    /// Refuse to run the erase command (recommended in production).
    #[arg(long)]
    disable_erase: bool,

    /// Show debug-level output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations up to the target version.
    Migrate {
        /// Highest version to apply (all if not specified).
        #[arg(short, long)]
        target: Option<String>,

        /// Erase the managed schemas and migrate from scratch when
        /// validation fails.
        #[arg(long)]
        erase_on_validation_error: bool,
    },

    /// Verify that applied scripts still match the ledger.
    Validate,

    /// Realign ledger checksums with the scripts on disk.
    Repair,

    /// Drop or empty every schema the engine has a mandate over.
    Erase,

    /// Show the migration ledger.
    Info,
}

fn build_config(cli: &Cli) -> anyhow::Result<MigrationConfig> {
    let mut config = MigrationConfig::new()
        .connect(cli.driver.clone(), cli.database.clone())
        .locations(cli.locations.clone())
        .schemas(cli.schemas.clone())
        .metadata_table(cli.metadata_schema.clone(), cli.metadata_table.clone())
        .disable_erase(cli.disable_erase);

    for pair in &cli.placeholders {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("placeholder '{pair}' is not KEY=VALUE"))?;
        config = config.placeholder(key, value);
    }

    if let Commands::Migrate {
        target,
        erase_on_validation_error,
    } = &cli.command
    {
        if let Some(target) = target {
            config = config.target_version(MigrationVersion::parse(target)?);
        }
        config = config.erase_on_validation_error(*erase_on_validation_error);
    }

    Ok(config)
}

/// Installs the log subscriber before any command output.
fn init_logging(verbose: bool) {
    let max_level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = build_config(&cli)?;
    let mut engine = MigrationEngine::connect(config).await?;

    match cli.command {
        Commands::Migrate { .. } => {
            let report = engine.migrate().await?;
            if report.applied_count == 0 {
                info!("Database is up to date.");
            }
        }

        Commands::Validate => {
            engine.validate().await?;
            info!("Validation passed.");
        }

        Commands::Repair => {
            engine.repair().await?;
        }

        Commands::Erase => {
            engine.erase().await?;
        }

        Commands::Info => {
            let entries = engine.info().await?;
            if entries.is_empty() {
                info!("The ledger is empty.");
            } else {
                println!("\nMigration ledger:");
                println!("{:-<78}", "");
                for entry in &entries {
                    let version = entry
                        .version
                        .as_ref()
                        .map_or_else(String::new, ToString::to_string);
                    println!(
                        " [{}] {:>4}  {:<12} {:<8} {:<30} {}",
                        if entry.success { "X" } else { " " },
                        entry.id,
                        format!("{:?}", entry.kind),
                        version,
                        entry.name,
                        entry.installed_on.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                println!();
            }
        }
    }

    Ok(())
}
