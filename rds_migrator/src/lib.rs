//! Migration runner for the private RDS database
//!
//! Deployed as a Lambda function inside the database VPC. Each invocation
//! reads the connection parameters from the database secret and applies the
//! SQL migrations packaged next to the binary.

pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod handler;
pub mod secrets;
pub mod utils;

// Re-export main types for easier access
pub use config::{DatabaseConfig, MigrationsConfig, MigratorConfig, PoolSettings};
pub use credentials::DbCredentials;
pub use db::{
    Connector, CredentialsConnector, DatabaseConnection, MigrationReport, MigrationStatus, Migrator,
};
pub use error::{Error, Result};
pub use handler::{MigrateAction, MigrateRequest, MigrateResponse};
pub use secrets::{fetch_credentials, SecretSource, SecretsManagerSource};
