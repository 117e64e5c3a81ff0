//! Offline maintenance for the workbook database.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use workbook_tracker::db::{TemplateImport, import_templates, reconcile_orphans};
use workbook_tracker::env::load_environment;
use workbook_tracker::run_migrations;
use workbook_tracker::telemetry::{init_tracing, shutdown_telemetry};

/// Workbook tracker maintenance tasks
#[derive(Parser, Debug)]
#[command(name = "workbook-maintenance")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database to operate on
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete workbook instances that lack an owner or a template
    Reconcile {
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Create templates from a JSON array, skipping titles that already exist
    ImportTemplates {
        file: PathBuf,
    },
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let database_url = cli
        .database_url
        .context("DATABASE_URL must be set or passed with --database-url")?;

    let pool = SqlitePool::connect(&database_url)
        .await
        .with_context(|| format!("Failed to connect to {}", database_url))?;
    run_migrations(&pool).await?;

    match cli.command {
        Commands::Reconcile { dry_run } => {
            let report = reconcile_orphans(&pool, dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::ImportTemplates { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let imports: Vec<TemplateImport> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON array of templates", file.display()))?;

            let report = import_templates(&pool, &imports).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    pool.close().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let env_result = load_environment();
    let cli = Cli::parse();
    init_tracing();
    if let Err(e) = env_result {
        tracing::warn!("Failed to load environment files: {}", e);
    }

    let result = run(cli).await;
    shutdown_telemetry();

    if let Err(e) = result {
        tracing::error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
