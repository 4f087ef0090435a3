//! Database credentials stored in the instance secret
//!
//! Once attached to the instance, the secret is a JSON document holding
//! `host`, `port`, `username`, `password` and `dbname` alongside fields this
//! crate ignores (`engine`, `dbInstanceIdentifier`).

use serde::{Deserialize, Deserializer};
use sqlx::postgres::PgConnectOptions;
use std::fmt;

use crate::error::{Error, Result};

/// Connection parameters read from the secret
#[derive(Deserialize, Clone, PartialEq, Eq)]
pub struct DbCredentials {
    pub host: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub dbname: String,
}

impl DbCredentials {
    /// Parse the secret string
    pub fn from_secret_string(secret: &str) -> Result<Self> {
        let credentials: Self = serde_json::from_str(secret).map_err(|e| {
            Error::CredentialsError(format!("secret is not a valid credentials document: {}", e))
        })?;

        if credentials.host.is_empty() {
            return Err(Error::CredentialsError("secret has an empty host".to_string()));
        }
        if credentials.dbname.is_empty() {
            return Err(Error::CredentialsError("secret has an empty dbname".to_string()));
        }

        Ok(credentials)
    }

    /// Connection options for the instance named in the secret
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.dbname)
    }
}

impl fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("dbname", &self.dbname)
            .finish()
    }
}

/// Secrets Manager writes the port as a number, hand-edited secrets often
/// hold a string
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        Text(String),
    }

    match PortValue::deserialize(deserializer)? {
        PortValue::Number(port) => Ok(port),
        PortValue::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
    }
}
