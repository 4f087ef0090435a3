//! Environment configuration
//!
//! A static table from environment name to the account, network and database
//! sizing of that environment. The built-in table is compiled from
//! `environments.toml`; an alternative table can be loaded from any TOML file
//! with the same shape.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::resources::network::Ipv4Cidr;

const BUILTIN_ENVIRONMENTS: &str = include_str!("../environments.toml");

static REGION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2}(-gov)?-[a-z]+-\d+$").expect("valid region regex"));
static ACCOUNT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{12}$").expect("valid account regex"));
static VPC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^vpc-[0-9a-f]+$").expect("valid vpc regex"));
static SUBNET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^subnet-[0-9a-f]+$").expect("valid subnet regex"));

/// Load an environment table from a TOML file
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Environments> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path).map_err(|e| {
        Error::ConfigError(format!(
            "Failed to read environments file {}: {}",
            path.display(),
            e
        ))
    })?;

    Environments::from_toml(&config_str)
}

/// Database instance class (the family part of `db.<class>.<size>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceClass {
    T3,
    T4g,
    M5,
    M6g,
    R5,
    R6g,
}

impl InstanceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceClass::T3 => "t3",
            InstanceClass::T4g => "t4g",
            InstanceClass::M5 => "m5",
            InstanceClass::M6g => "m6g",
            InstanceClass::R5 => "r5",
            InstanceClass::R6g => "r6g",
        }
    }
}

/// Database instance size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceSize {
    Micro,
    Small,
    Medium,
    Large,
    Xlarge,
    #[serde(rename = "2xlarge")]
    Xlarge2,
}

impl InstanceSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceSize::Micro => "micro",
            InstanceSize::Small => "small",
            InstanceSize::Medium => "medium",
            InstanceSize::Large => "large",
            InstanceSize::Xlarge => "xlarge",
            InstanceSize::Xlarge2 => "2xlarge",
        }
    }
}

/// Settings for one deployment environment
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EnvironmentConfig {
    pub region: String,
    pub stack_name: String,
    pub account_id: String,
    pub vpc_id: String,
    /// CIDR block of the existing VPC; the only address range allowed to reach the database
    pub vpc_cidr: String,
    /// Private subnets with egress that host the database, proxy and function
    pub private_subnet_ids: Vec<String>,
    pub backup_retention_days: u32,
    pub instance_class: InstanceClass,
    pub instance_size: InstanceSize,
    pub storage_gb: u32,
}

impl EnvironmentConfig {
    /// RDS instance type, e.g. `db.t3.micro`
    pub fn instance_type(&self) -> String {
        format!(
            "db.{}.{}",
            self.instance_class.as_str(),
            self.instance_size.as_str()
        )
    }

    /// Parsed VPC CIDR block
    pub fn vpc_cidr_block(&self) -> Result<Ipv4Cidr> {
        self.vpc_cidr.parse()
    }

    /// Check that every field is present and well formed
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("region", &self.region),
            ("stack_name", &self.stack_name),
            ("account_id", &self.account_id),
            ("vpc_id", &self.vpc_id),
            ("vpc_cidr", &self.vpc_cidr),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::ValidationError(format!("{} must not be empty", field)));
            }
        }

        if !REGION_PATTERN.is_match(&self.region) {
            return Err(Error::ValidationError(format!(
                "region '{}' is not a valid AWS region",
                self.region
            )));
        }

        if !ACCOUNT_PATTERN.is_match(&self.account_id) {
            return Err(Error::ValidationError(format!(
                "account_id '{}' must be a 12 digit AWS account id",
                self.account_id
            )));
        }

        if !VPC_PATTERN.is_match(&self.vpc_id) {
            return Err(Error::ValidationError(format!(
                "vpc_id '{}' is not a VPC id",
                self.vpc_id
            )));
        }

        let cidr = self.vpc_cidr_block()?;
        if cidr.is_any() {
            return Err(Error::ValidationError(
                "vpc_cidr must not be 0.0.0.0/0".to_string(),
            ));
        }

        if self.private_subnet_ids.is_empty() {
            return Err(Error::ValidationError(
                "private_subnet_ids must list at least one subnet".to_string(),
            ));
        }
        if let Some(bad) = self
            .private_subnet_ids
            .iter()
            .find(|id| !SUBNET_PATTERN.is_match(id))
        {
            return Err(Error::ValidationError(format!(
                "'{}' is not a subnet id",
                bad
            )));
        }

        if self.storage_gb == 0 {
            return Err(Error::ValidationError(
                "storage_gb must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// The environment table, in declaration order
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(transparent)]
pub struct Environments(IndexMap<String, EnvironmentConfig>);

impl Environments {
    /// The table compiled into the binary
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_ENVIRONMENTS)
    }

    /// Parse and validate a table from TOML text
    pub fn from_toml(config_str: &str) -> Result<Self> {
        let environments: Environments = toml::from_str(config_str)
            .map_err(|e| Error::ConfigError(format!("Failed to parse environments: {}", e)))?;

        if environments.0.is_empty() {
            return Err(Error::ConfigError("No environments defined".to_string()));
        }

        for (name, config) in &environments.0 {
            config
                .validate()
                .map_err(|e| Error::ConfigError(format!("environment '{}': {}", name, e)))?;
        }

        Ok(environments)
    }

    /// Look up one environment by name
    pub fn get(&self, name: &str) -> Result<&EnvironmentConfig> {
        self.0
            .get(name)
            .ok_or_else(|| Error::UnknownEnvironment(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EnvironmentConfig)> {
        self.0.iter().map(|(name, config)| (name.as_str(), config))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for InstanceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for InstanceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging() -> EnvironmentConfig {
        Environments::builtin().unwrap().get("staging").unwrap().clone()
    }

    #[test]
    fn test_builtin_table() {
        let environments = Environments::builtin().unwrap();
        let names: Vec<&str> = environments.names().collect();
        assert_eq!(names, vec!["staging", "prod"]);
    }

    #[test]
    fn test_instance_type() {
        let environments = Environments::builtin().unwrap();
        assert_eq!(environments.get("staging").unwrap().instance_type(), "db.t3.micro");
        assert_eq!(environments.get("prod").unwrap().instance_type(), "db.t4g.large");
    }

    #[test]
    fn test_unknown_environment() {
        let environments = Environments::builtin().unwrap();
        assert!(matches!(
            environments.get("dev"),
            Err(Error::UnknownEnvironment(name)) if name == "dev"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_region() {
        let mut config = staging();
        config.region = "Sydney".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_field() {
        let mut config = staging();
        config.stack_name = "  ".to_string();
        assert!(matches!(config.validate(), Err(Error::ValidationError(_))));
    }

    #[test]
    fn test_validate_rejects_open_cidr() {
        let mut config = staging();
        config.vpc_cidr = "0.0.0.0/0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_subnet() {
        let mut config = staging();
        config.private_subnet_ids = vec!["private-a".to_string()];
        assert!(config.validate().is_err());
    }
}
