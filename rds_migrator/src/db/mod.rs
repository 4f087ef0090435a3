//! Database module for the migration function
//!
//! This module handles database connections and migrations.

pub mod connection;
pub mod migrations;

// Re-export key types
pub use connection::{Connector, CredentialsConnector, DatabaseConnection, Dialect};
pub use migrations::{Migration, MigrationReport, MigrationSource, MigrationStatus, Migrator};
