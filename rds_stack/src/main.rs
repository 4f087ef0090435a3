//! Synthesizes the database stack for each environment

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rds_stack::utils::logging::{init_logging, LoggingConfig};
use rds_stack::package::DEFAULT_MIGRATIONS_SOURCE;
use rds_stack::{load_environments, package_function, synthesize_with_package};

#[derive(Parser)]
#[command(name = "rds-stack", version, about = "RDS Postgres stack synthesizer")]
struct Cli {
    /// TOML file with the environment table (defaults to the built-in table)
    #[arg(long, global = true)]
    environments: Option<PathBuf>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write CloudFormation templates and a manifest
    Synth {
        /// Environment to synthesize; repeat for several, omit for all
        #[arg(long = "env")]
        envs: Vec<String>,

        #[arg(long, default_value = "cdk.out")]
        out: PathBuf,

        /// Built migration function executable; packages it with the scripts
        #[arg(long)]
        bootstrap: Option<PathBuf>,

        #[arg(long, default_value = DEFAULT_MIGRATIONS_SOURCE)]
        migrations: PathBuf,
    },
    /// Zip the migration function executable with its scripts
    Package {
        #[arg(long)]
        bootstrap: PathBuf,

        #[arg(long, default_value = DEFAULT_MIGRATIONS_SOURCE)]
        migrations: PathBuf,

        #[arg(long, default_value = "cdk.out")]
        out: PathBuf,
    },
    /// List environments and their stack names
    List,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LoggingConfig {
        level: cli.log_level.clone(),
        format: if cli.json_logs { "json" } else { "text" }.to_string(),
    })?;

    let environments = load_environments(cli.environments.as_deref())
        .context("failed to load environment table")?;

    match cli.command {
        Command::Synth {
            envs,
            out,
            bootstrap,
            migrations,
        } => {
            for name in &envs {
                environments.get(name)?;
            }
            let package = bootstrap
                .map(|bootstrap| package_function(&bootstrap, &migrations, &out))
                .transpose()
                .context("failed to package the migration function")?;

            let stacks = synthesize_with_package(&environments, &envs, &out, package.as_ref())
                .with_context(|| format!("failed to synthesize into {}", out.display()))?;
            for stack in stacks {
                println!("{}\t{}", stack.stack_name, stack.template_path.display());
            }
        }
        Command::Package {
            bootstrap,
            migrations,
            out,
        } => {
            let package = package_function(&bootstrap, &migrations, &out)
                .context("failed to package the migration function")?;
            println!("{}\t{}", package.s3_key, package.path.display());
        }
        Command::List => {
            for (name, config) in environments.iter() {
                println!(
                    "{}\t{}\t{}\t{}",
                    name,
                    config.stack_name,
                    config.region,
                    config.instance_type()
                );
            }
        }
    }

    Ok(())
}
