//! Error types for the stack definition

use thiserror::Error;

/// Result type for stack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the stack definition
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Duplicate resource logical id: {0}")]
    DuplicateResource(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Package error: {0}")]
    PackageError(String),
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert TOML deserialization errors to configuration errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(error: zip::result::ZipError) -> Self {
        Error::PackageError(error.to_string())
    }
}

impl From<walkdir::Error> for Error {
    fn from(error: walkdir::Error) -> Self {
        Error::PackageError(error.to_string())
    }
}
