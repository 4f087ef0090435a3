//! Utilities for the stack definition
//!
//! Logging setup and logical id naming shared by the resource model.

pub mod logging;
pub mod naming;

pub use naming::{logical_id, scoped_logical_id};
