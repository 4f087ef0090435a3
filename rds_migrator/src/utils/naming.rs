//! Identifier and migration name utilities

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::error::{Error, Result};

/// PostgreSQL truncates identifiers longer than this
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Check that a name can be interpolated into SQL as a bare identifier
///
/// The tracking table name is formatted into DDL, so only plain identifiers
/// are accepted.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(Error::ValidationError(format!(
            "identifier '{}' must be 1 to {} characters",
            name, MAX_IDENTIFIER_LENGTH
        )));
    }
    if !IDENTIFIER_PATTERN.is_match(name) {
        return Err(Error::ValidationError(format!(
            "identifier '{}' may only contain letters, digits and underscores",
            name
        )));
    }
    Ok(())
}

/// Migration name of a file: its file name, extension included
pub fn migration_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::MigrationError(format!(
                "migration file name is not valid UTF-8: {}",
                path.display()
            ))
        })
}
