//! Error types for the migration function

use thiserror::Error;

/// Result type for migrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the migration function
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Secret error: {0}")]
    SecretError(String),

    #[error("secret string is empty for secret '{0}'")]
    EmptySecret(String),

    #[error("Credentials error: {0}")]
    CredentialsError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Migration {name} failed: {source}")]
    MigrationFailed {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Migration table '{0}' is already locked by another run")]
    MigrationLocked(String),

    #[error("The migration directory is corrupt, the following files are missing: {}", .0.join(", "))]
    CorruptMigrationDirectory(Vec<String>),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Convert Serde JSON errors to migrator errors
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}
