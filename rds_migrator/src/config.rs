//! Configuration handling for the migration function
//!
//! The function is configured entirely through environment variables set by
//! the stack. Defaults match the layout of the deployment package: a
//! `bootstrap` binary next to a `migrations/` directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::utils::logging::LoggingConfig;
use crate::utils::naming::validate_identifier;

pub const SECRET_ARN_ENV: &str = "DB_SECRET_ARN";
pub const REGION_ENV: &str = "AWS_REGION";
pub const MIGRATIONS_DIR_ENV: &str = "MIGRATIONS_DIR";
pub const MIGRATIONS_TABLE_ENV: &str = "MIGRATIONS_TABLE";
pub const POOL_SIZE_ENV: &str = "DB_POOL_SIZE";
pub const CONNECT_TIMEOUT_ENV: &str = "DB_CONNECT_TIMEOUT_SECONDS";
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";
pub const DEFAULT_MIGRATION_EXTENSION: &str = "sql";

/// Complete configuration of one invocation
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MigratorConfig {
    /// Secret holding the connection parameters; empty when unset
    pub secret_id: String,
    pub region: Option<String>,
    pub migrations: MigrationsConfig,
    pub pool: PoolSettings,
    pub logging: LoggingConfig,
}

/// Migration settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MigrationsConfig {
    pub directory: PathBuf,
    pub table_name: String,
    /// Only files with this extension are migrations
    pub extension: String,
    /// Run scripts outside a transaction; a failing script may then leave
    /// partial changes behind
    pub disable_transactions: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            table_name: DEFAULT_MIGRATIONS_TABLE.to_string(),
            extension: DEFAULT_MIGRATION_EXTENSION.to_string(),
            disable_transactions: false,
        }
    }
}

impl MigrationsConfig {
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.table_name)?;
        // The lock table is named after the tracking table
        validate_identifier(&format!("{}_lock", self.table_name))?;
        if self.extension.is_empty() {
            return Err(Error::ConfigError(
                "migration extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection pool settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 1,
            connect_timeout_seconds: 30,
        }
    }
}

/// Connection settings for running migrations from a URL, outside Lambda
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

impl MigratorConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let defaults = MigrationsConfig::default();
        let migrations = MigrationsConfig {
            directory: non_empty(MIGRATIONS_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.directory),
            table_name: non_empty(MIGRATIONS_TABLE_ENV).unwrap_or(defaults.table_name),
            extension: defaults.extension,
            disable_transactions: false,
        };
        migrations.validate()?;

        let pool_defaults = PoolSettings::default();
        let pool = PoolSettings {
            max_connections: parse_var(POOL_SIZE_ENV, non_empty(POOL_SIZE_ENV))?
                .unwrap_or(pool_defaults.max_connections),
            connect_timeout_seconds: parse_var(CONNECT_TIMEOUT_ENV, non_empty(CONNECT_TIMEOUT_ENV))?
                .unwrap_or(pool_defaults.connect_timeout_seconds),
        };
        if pool.max_connections == 0 {
            return Err(Error::ConfigError(format!(
                "{} must be at least 1",
                POOL_SIZE_ENV
            )));
        }

        let logging_defaults = LoggingConfig::lambda();
        let logging = LoggingConfig {
            level: non_empty(LOG_LEVEL_ENV).unwrap_or(logging_defaults.level),
            format: non_empty(LOG_FORMAT_ENV).unwrap_or(logging_defaults.format),
            ..logging_defaults
        };

        Ok(Self {
            // An unset variable becomes an empty id, which the secret store rejects
            secret_id: lookup(SECRET_ARN_ENV).unwrap_or_default(),
            region: non_empty(REGION_ENV),
            migrations,
            pool,
            logging,
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
    value
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| Error::ConfigError(format!("{} has invalid value '{}'", key, raw)))
        })
        .transpose()
}
