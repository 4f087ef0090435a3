//! Secret retrieval
//!
//! [`SecretSource`] abstracts the secret store so the runner can be driven by
//! an in-memory source in tests. [`SecretsManagerSource`] is the AWS
//! implementation used by the Lambda function.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_secretsmanager::Client;
use tracing::{debug, info};

use crate::credentials::DbCredentials;
use crate::error::{Error, Result};

/// A store that resolves secret ids to secret strings
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Returns `None` when the secret exists but has no string value
    async fn secret_string(&self, secret_id: &str) -> Result<Option<String>>;
}

/// AWS Secrets Manager backed source
#[derive(Clone, Debug)]
pub struct SecretsManagerSource {
    client: Client,
}

impl SecretsManagerSource {
    /// Build a client from the default credential chain, pinned to `region`
    /// when given
    pub async fn new(region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = loader.load().await;

        info!(
            region = config.region().map(|r| r.as_ref()).unwrap_or("unset"),
            "Secrets Manager client ready"
        );
        Self::with_client(Client::new(&config))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretSource for SecretsManagerSource {
    async fn secret_string(&self, secret_id: &str) -> Result<Option<String>> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| {
                Error::SecretError(format!("failed to read secret '{}': {}", secret_id, e))
            })?;

        Ok(output.secret_string().map(str::to_string))
    }
}

/// Fetch and parse the database credentials held in `secret_id`
///
/// An empty or missing secret string fails before any connection attempt.
pub async fn fetch_credentials(source: &dyn SecretSource, secret_id: &str) -> Result<DbCredentials> {
    debug!(secret_id, "Fetching database credentials");

    let secret = source.secret_string(secret_id).await?.unwrap_or_default();
    if secret.trim().is_empty() {
        return Err(Error::EmptySecret(secret_id.to_string()));
    }

    DbCredentials::from_secret_string(&secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticSource(HashMap<String, Option<String>>);

    #[async_trait]
    impl SecretSource for StaticSource {
        async fn secret_string(&self, secret_id: &str) -> Result<Option<String>> {
            self.0
                .get(secret_id)
                .cloned()
                .ok_or_else(|| Error::SecretError(format!("secret '{}' not found", secret_id)))
        }
    }

    fn source(entries: &[(&str, Option<&str>)]) -> StaticSource {
        StaticSource(
            entries
                .iter()
                .map(|(id, value)| (id.to_string(), value.map(str::to_string)))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_fetch_credentials() {
        let source = source(&[(
            "db",
            Some(r#"{"host":"db.internal","port":5432,"username":"root","password":"p","dbname":"database_name"}"#),
        )]);

        let credentials = fetch_credentials(&source, "db").await.unwrap();
        assert_eq!(credentials.host, "db.internal");
        assert_eq!(credentials.dbname, "database_name");
    }

    #[tokio::test]
    async fn test_missing_secret_string() {
        let source = source(&[("binary", None), ("blank", Some(""))]);

        for id in ["binary", "blank"] {
            let err = fetch_credentials(&source, id).await.unwrap_err();
            assert!(matches!(err, Error::EmptySecret(_)));
            assert!(err.to_string().starts_with("secret string is empty"));
        }
    }

    #[tokio::test]
    async fn test_unknown_secret() {
        let source = source(&[]);
        let err = fetch_credentials(&source, "").await.unwrap_err();
        assert!(matches!(err, Error::SecretError(_)));
    }
}
