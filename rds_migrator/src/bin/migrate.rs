//! Runs the bundled migrations against a database URL, outside Lambda

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use rds_migrator::config::{DEFAULT_MIGRATIONS_DIR, DEFAULT_MIGRATIONS_TABLE};
use rds_migrator::handler::execute;
use rds_migrator::utils::logging::{init_logging, LoggingConfig};
use rds_migrator::{DatabaseConfig, DatabaseConnection, MigrateAction, MigrationsConfig, Migrator};

#[derive(Parser)]
#[command(name = "migrate", version, about = "Apply SQL migrations to a database")]
struct Cli {
    #[arg(value_enum, default_value = "latest")]
    action: Action,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, default_value = DEFAULT_MIGRATIONS_DIR)]
    dir: PathBuf,

    #[arg(long, default_value = DEFAULT_MIGRATIONS_TABLE)]
    table: String,

    /// Run each script outside a transaction
    #[arg(long)]
    disable_transactions: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Action {
    Latest,
    Up,
    List,
    Unlock,
}

impl From<Action> for MigrateAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Latest => MigrateAction::Latest,
            Action::Up => MigrateAction::Up,
            Action::List => MigrateAction::List,
            Action::Unlock => MigrateAction::Unlock,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&LoggingConfig::terminal(&cli.log_level))?;

    let connection = DatabaseConnection::connect(&DatabaseConfig {
        url: cli.database_url.clone(),
        pool_size: Some(1),
        timeout_seconds: None,
    })
    .await
    .context("failed to connect to database")?;

    let migrations = MigrationsConfig {
        directory: cli.dir.clone(),
        table_name: cli.table.clone(),
        disable_transactions: cli.disable_transactions,
        ..MigrationsConfig::default()
    };
    let migrator = Migrator::new(&connection, &migrations)?;

    let result = execute(&migrator, cli.action.into()).await;
    connection.close().await;
    let response =
        result.with_context(|| format!("migration failed in {}", cli.dir.display()))?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
