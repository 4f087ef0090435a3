//! Logging setup for the migration function
//!
//! Lambda ships stdout to CloudWatch, so the function logs JSON without ANSI
//! colours. The local CLI logs plain text.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub ansi: bool,
}

impl LoggingConfig {
    /// Settings used inside Lambda
    pub fn lambda() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            ansi: false,
        }
    }

    /// Settings used by the local CLI
    pub fn terminal(level: &str) -> Self {
        Self {
            level: level.to_string(),
            format: "text".to_string(),
            ansi: true,
        }
    }
}

/// Parse a log level name, falling back to INFO
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging based on configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = parse_level(&config.level);
    let directive = format!("rds_migrator={}", level)
        .parse()
        .map_err(|e| Error::ConfigError(format!("Invalid log directive: {}", e)))?;
    let env_filter = EnvFilter::from_default_env().add_directive(directive);

    if config.format.eq_ignore_ascii_case("json") {
        let subscriber = fmt::Subscriber::builder()
            .json()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_target(false)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| Error::ConfigError(e.to_string()))?;
    } else {
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_ansi(config.ansi)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| Error::ConfigError(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_lambda_defaults() {
        let config = LoggingConfig::lambda();
        assert_eq!(config.format, "json");
        assert!(!config.ansi);
    }
}
