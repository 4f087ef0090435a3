//! Database connection handling
//!
//! The function only ever talks to PostgreSQL. SQLite is kept as a second
//! driver so the runner can be exercised against an in-memory database.

use async_trait::async_trait;
use sqlx::{
    postgres::PgPoolOptions, sqlite::SqlitePoolOptions, PgPool, SqlitePool,
};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{DatabaseConfig, PoolSettings};
use crate::credentials::DbCredentials;
use crate::error::{Error, Result};

/// SQL dialect of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Infer the dialect from a connection URL
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            _ => Err(Error::DatabaseError(format!(
                "Unsupported database URL scheme: '{}'",
                scheme
            ))),
        }
    }

    /// Bind parameter placeholder for the 1-based position `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::Sqlite => "?".to_string(),
        }
    }
}

/// A pooled connection to one of the supported databases
#[derive(Debug, Clone)]
pub enum DatabaseConnection {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl DatabaseConnection {
    /// Connect using a URL, as the local CLI does
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let defaults = PoolSettings::default();
        let pool_size = config.pool_size.unwrap_or(defaults.max_connections);
        let timeout = Duration::from_secs(
            config
                .timeout_seconds
                .unwrap_or(defaults.connect_timeout_seconds),
        );

        match Dialect::from_url(&config.url)? {
            Dialect::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await?;

                Ok(DatabaseConnection::Postgres(pool))
            }
            Dialect::Sqlite => {
                // An in-memory database lives as long as its connection
                let pool = SqlitePoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect(&config.url)
                    .await?;

                Ok(DatabaseConnection::Sqlite(pool))
            }
        }
    }

    /// Connect to the instance described by the database secret
    pub async fn from_credentials(credentials: &DbCredentials, pool: &PoolSettings) -> Result<Self> {
        info!(
            host = %credentials.host,
            port = credentials.port,
            database = %credentials.dbname,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(pool.max_connections)
            .acquire_timeout(Duration::from_secs(pool.connect_timeout_seconds))
            .connect_with(credentials.connect_options())
            .await
            .map_err(|e| {
                Error::DatabaseError(format!(
                    "failed to connect to {}:{}: {}",
                    credentials.host, credentials.port, e
                ))
            })?;

        Ok(DatabaseConnection::Postgres(pool))
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            DatabaseConnection::Postgres(_) => Dialect::Postgres,
            DatabaseConnection::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Execute a single SQL statement
    pub async fn execute(&self, sql: &str) -> Result<()> {
        debug!(sql, "Executing statement");
        match self {
            DatabaseConnection::Postgres(pool) => {
                sqlx::query(sql).execute(pool).await?;
            }
            DatabaseConnection::Sqlite(pool) => {
                sqlx::query(sql).execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        match self {
            DatabaseConnection::Postgres(pool) => pool.close().await,
            DatabaseConnection::Sqlite(pool) => pool.close().await,
        }
    }
}

/// Opens the database connection for an invocation
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        credentials: &DbCredentials,
        pool: &PoolSettings,
    ) -> Result<DatabaseConnection>;
}

/// Connects to the PostgreSQL instance named in the credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialsConnector;

#[async_trait]
impl Connector for CredentialsConnector {
    async fn connect(
        &self,
        credentials: &DbCredentials,
        pool: &PoolSettings,
    ) -> Result<DatabaseConnection> {
        DatabaseConnection::from_credentials(credentials, pool).await
    }
}
