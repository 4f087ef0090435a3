//! Lambda event handling
//!
//! An invocation reads the database secret, connects to the instance and
//! runs the requested action against the bundled migrations. The payload is
//! optional: a missing or empty event runs `latest`.

use lambda_runtime::LambdaEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::config::MigratorConfig;
use crate::db::{Connector, Migrator};
use crate::error::{Error, Result};
use crate::secrets::{fetch_credentials, SecretSource};

/// Action requested by an invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrateAction {
    /// Apply all pending migrations
    #[default]
    Latest,
    /// Apply the next pending migration
    Up,
    /// Report status only
    List,
    /// Release a lock left by a run that did not finish
    Unlock,
}

/// Invocation payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MigrateRequest {
    pub action: MigrateAction,
}

impl MigrateRequest {
    /// Interpret a raw event; `null` and objects without `action` mean `latest`
    pub fn from_event(payload: Value) -> Result<Self> {
        match payload {
            Value::Null => Ok(Self::default()),
            other => serde_json::from_value(other).map_err(|e| {
                Error::ValidationError(format!("invalid migration request: {}", e))
            }),
        }
    }
}

/// Invocation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrateResponse {
    pub action: MigrateAction,
    pub batch: Option<i64>,
    pub applied: Vec<String>,
    pub pending: Vec<String>,
}

/// Run an action with an established migrator
pub async fn execute(migrator: &Migrator<'_>, action: MigrateAction) -> Result<MigrateResponse> {
    let (batch, applied) = match action {
        MigrateAction::Latest => {
            let report = migrator.latest().await?;
            (report.batch, report.applied)
        }
        MigrateAction::Up => {
            let report = migrator.up().await?;
            (report.batch, report.applied)
        }
        MigrateAction::List => (None, Vec::new()),
        MigrateAction::Unlock => {
            migrator.force_unlock().await?;
            (None, Vec::new())
        }
    };
    let status = migrator.list().await?;

    Ok(MigrateResponse {
        action,
        batch,
        applied,
        pending: status.pending,
    })
}

/// Fetch credentials, connect and run `action`
pub async fn run_migrations(
    config: &MigratorConfig,
    secrets: &dyn SecretSource,
    connector: &dyn Connector,
    action: MigrateAction,
) -> Result<MigrateResponse> {
    let credentials = fetch_credentials(secrets, &config.secret_id).await?;
    let connection = connector.connect(&credentials, &config.pool).await?;

    let result = match Migrator::new(&connection, &config.migrations) {
        Ok(migrator) => execute(&migrator, action).await,
        Err(e) => Err(e),
    };
    connection.close().await;
    result
}

/// Lambda entry point
pub async fn function_handler(
    event: LambdaEvent<Value>,
    config: &MigratorConfig,
    secrets: &dyn SecretSource,
    connector: &dyn Connector,
) -> std::result::Result<MigrateResponse, lambda_runtime::Error> {
    let request_id = event.context.request_id.clone();
    let request = MigrateRequest::from_event(event.payload)?;
    info!(request_id = %request_id, action = ?request.action, "Migration requested");

    match run_migrations(config, secrets, connector, request.action).await {
        Ok(response) => {
            info!(
                request_id = %request_id,
                batch = ?response.batch,
                applied = response.applied.len(),
                pending = response.pending.len(),
                "Migration finished"
            );
            Ok(response)
        }
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Migration failed");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults_to_latest() {
        assert_eq!(
            MigrateRequest::from_event(Value::Null).unwrap().action,
            MigrateAction::Latest
        );
        assert_eq!(
            MigrateRequest::from_event(json!({})).unwrap().action,
            MigrateAction::Latest
        );
        assert_eq!(
            MigrateRequest::from_event(json!({"key1": "value1"}))
                .unwrap()
                .action,
            MigrateAction::Latest
        );
    }

    #[test]
    fn test_request_actions() {
        assert_eq!(
            MigrateRequest::from_event(json!({"action": "up"})).unwrap().action,
            MigrateAction::Up
        );
        assert_eq!(
            MigrateRequest::from_event(json!({"action": "list"})).unwrap().action,
            MigrateAction::List
        );
        assert_eq!(
            MigrateRequest::from_event(json!({"action": "unlock"})).unwrap().action,
            MigrateAction::Unlock
        );
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        assert!(MigrateRequest::from_event(json!({"action": "rollback"})).is_err());
        assert!(MigrateRequest::from_event(json!("latest")).is_err());
    }

    #[test]
    fn test_response_shape() {
        let response = MigrateResponse {
            action: MigrateAction::Latest,
            batch: Some(1),
            applied: vec!["001_init.sql".to_string()],
            pending: vec![],
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "action": "latest",
                "batch": 1,
                "applied": ["001_init.sql"],
                "pending": []
            })
        );
    }
}
