use lambda_runtime::{service_fn, LambdaEvent};
use serde_json::Value;

use rds_migrator::db::CredentialsConnector;
use rds_migrator::handler::function_handler;
use rds_migrator::utils::logging::init_logging;
use rds_migrator::{MigratorConfig, SecretsManagerSource};

#[tokio::main]
async fn main() -> Result<(), lambda_runtime::Error> {
    let config = MigratorConfig::from_env()?;
    init_logging(&config.logging)?;

    let secrets = SecretsManagerSource::new(config.region.as_deref()).await;

    let config = &config;
    let secrets = &secrets;
    let connector = &CredentialsConnector;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        function_handler(event, config, secrets, connector).await
    }))
    .await
}
