//! rds_stack: the RDS Postgres stack as typed Rust
//!
//! Declares a Postgres instance inside an existing VPC, its security groups,
//! credentials secret and RDS Proxy, and the Lambda function that migrates it,
//! then renders each environment's stack as a CloudFormation template.

pub mod config;
pub mod construct;
pub mod error;
pub mod package;
pub mod resources;
pub mod stack;
pub mod synth;
pub mod template;
pub mod utils;

// Re-export main types for easier access
pub use config::{EnvironmentConfig, Environments, InstanceClass, InstanceSize};
pub use construct::{Lambda, LambdaProps};
pub use error::{Error, Result};
pub use package::{package_function, FunctionPackage};
pub use stack::DatabaseStack;
pub use synth::{synthesize, synthesize_with_package};
pub use template::Template;

/// Load the environment table, from a file when given or the built-in one otherwise
pub fn load_environments(path: Option<&std::path::Path>) -> Result<Environments> {
    match path {
        Some(path) => config::load_from_file(path),
        None => Environments::builtin(),
    }
}
