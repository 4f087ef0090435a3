//! Utilities for the migration function
//!
//! This module provides logging setup and identifier helpers.

pub mod logging;
pub mod naming;

pub use naming::{migration_name, validate_identifier};
