//! The database stack
//!
//! One Postgres instance in the private subnets of an existing VPC, fronted by
//! an RDS Proxy, plus the function that applies migrations to it.

use indexmap::IndexMap;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EnvironmentConfig;
use crate::construct::{Lambda, LambdaProps};
use crate::error::Result;
use crate::resources::intrinsic::reference;
use crate::resources::rds::group_ids;
use crate::resources::{
    Code, DatabaseInstance, DatabaseProxy, DatabaseSecret, FunctionConfig, ManagedPolicy,
    ParameterGroup, Peer, PolicyDocument, PolicyStatement, Port, PostgresEngine, RemovalPolicy,
    Role, SecurityGroup, ServicePrincipal, SubnetGroup, Vpc, VpcPlacement,
};
use crate::template::{Parameter, Template};

pub const DATABASE_PORT: u16 = 5432;
pub const DATABASE_NAME: &str = "database_name";
pub const MASTER_USERNAME: &str = "root";
pub const MIGRATOR_FUNCTION_NAME: &str = "migrator-function";
pub const MIGRATOR_ROLE_NAME: &str = "migrator-function-role";
/// Environment variable the migration function reads the secret ARN from
pub const SECRET_ARN_ENV: &str = "DB_SECRET_ARN";
pub const CODE_BUCKET_PARAMETER: &str = "MigratorCodeS3Bucket";
pub const CODE_KEY_PARAMETER: &str = "MigratorCodeS3Key";
/// Parameter that disables enforced TLS on the instance
pub const FORCE_SSL_PARAMETER: &str = "rds.force_ssl";

/// Every resource of one environment's stack
#[derive(Debug, Clone)]
pub struct DatabaseStack {
    pub environment: String,
    pub config: EnvironmentConfig,
    pub vpc: Vpc,
    pub credentials: DatabaseSecret,
    pub lambda_sg: SecurityGroup,
    pub db_sg: SecurityGroup,
    pub parameter_group: ParameterGroup,
    pub instance: DatabaseInstance,
    pub proxy_role: Role,
    pub proxy: DatabaseProxy,
    pub migrator: Lambda,
}

impl DatabaseStack {
    /// Compose the stack for one environment
    pub fn build(environment: &str, config: &EnvironmentConfig) -> Result<Self> {
        config.validate()?;
        info!(
            environment = environment,
            stack = %config.stack_name,
            region = %config.region,
            "Building database stack"
        );

        let vpc = Vpc::from_environment(config)?;
        let engine = PostgresEngine::ver_15_3();
        let port = Port::tcp(DATABASE_PORT);

        let credentials = DatabaseSecret::new("db-credentials", MASTER_USERNAME);

        let lambda_sg = SecurityGroup::new("lambda-sg", &vpc, true);

        let mut db_sg = SecurityGroup::new("db-sg", &vpc, true);
        db_sg.add_ingress_rule(db_sg.as_peer(), port, None)?;
        db_sg.add_ingress_rule(lambda_sg.as_peer(), port, Some("Allow access from Lambda"))?;
        db_sg.add_ingress_rule(
            Peer::Ipv4(vpc.cidr_block),
            port,
            Some(&format!(
                "Allow for database connection from only within the VPC ({})",
                vpc.vpc_id
            )),
        )?;

        // The proxy cannot negotiate with an instance that forces TLS
        // ("no pg_hba.conf entry for host"), so enforcement stays off.
        let parameter_group = ParameterGroup::new(
            "db-parameter-group",
            &engine,
            "Parameter group for Postgres DB",
        )
        .parameter(FORCE_SSL_PARAMETER, "0");
        warn!(
            environment = environment,
            parameter = FORCE_SSL_PARAMETER,
            "TLS is not enforced on the database instance"
        );

        let instance = DatabaseInstance {
            logical_id: "Database".to_string(),
            engine,
            instance_type: config.instance_type(),
            port: DATABASE_PORT,
            database_name: DATABASE_NAME.to_string(),
            subnet_group: SubnetGroup {
                logical_id: "DatabaseSubnetGroup".to_string(),
                description: "Subnet group for database database".to_string(),
                subnet_ids: vpc.private_subnet_ids.clone(),
            },
            security_group_ids: group_ids(&[&db_sg]),
            credentials: credentials.clone(),
            backup_retention_days: config.backup_retention_days,
            delete_automated_backups: true,
            removal_policy: RemovalPolicy::Destroy,
            allocated_storage_gb: config.storage_gb,
            parameter_group_id: parameter_group.logical_id.clone(),
        };

        let mut proxy_role = Role::new("db-proxy-role", ServicePrincipal::new("rds.amazonaws.com"));
        proxy_role.inline_policies.insert(
            "INLINE_POLICY".to_string(),
            PolicyDocument::new(vec![PolicyStatement::allow(
                ["secretsmanager:GetSecretValue"],
                vec![credentials.secret_arn()],
            )]),
        );

        let mut proxy = DatabaseProxy::new("db-proxy", &instance, proxy_role.arn());
        proxy.debug_logging = true;
        proxy.iam_auth = true;

        let mut function_config = FunctionConfig::rust(Code::S3 {
            bucket: reference(CODE_BUCKET_PARAMETER),
            key: reference(CODE_KEY_PARAMETER),
        });
        function_config.timeout = Duration::from_secs(3 * 60);
        function_config
            .environment
            .insert(SECRET_ARN_ENV.to_string(), credentials.secret_arn());
        function_config.vpc = Some(VpcPlacement {
            subnet_ids: vpc.private_subnet_ids.clone(),
            security_group_ids: group_ids(&[&lambda_sg]),
        });

        let mut migrator = Lambda::new(
            LambdaProps::new(
                MIGRATOR_FUNCTION_NAME,
                MIGRATOR_ROLE_NAME,
                "Performs migrations on the database located in a private VPC",
                function_config,
            )
            // Network interfaces in the private VPC
            .managed_policy(ManagedPolicy::aws_managed(
                "service-role/AWSLambdaVPCAccessExecutionRole",
            )),
        );
        migrator.grant_secret_read(&credentials);
        migrator.grant_proxy_connect(&proxy, MASTER_USERNAME);

        debug!(environment = environment, "Database stack composed");

        Ok(Self {
            environment: environment.to_string(),
            config: config.clone(),
            vpc,
            credentials,
            lambda_sg,
            db_sg,
            parameter_group,
            instance,
            proxy_role,
            proxy,
            migrator,
        })
    }

    /// Peers allowed to reach the database port
    pub fn ingress_sources(&self) -> Vec<&Peer> {
        self.db_sg
            .ingress
            .iter()
            .filter(|rule| {
                rule.port.from_port <= DATABASE_PORT && DATABASE_PORT <= rule.port.to_port
            })
            .map(|rule| &rule.peer)
            .collect()
    }

    /// Backup retention of this environment
    pub fn backup_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.instance.backup_retention_days) * 24 * 60 * 60)
    }

    /// Render the CloudFormation template
    pub fn to_template(&self) -> Result<Template> {
        let mut template = Template::new(format!(
            "Postgres database with RDS Proxy and migration function ({})",
            self.environment
        ));

        let mut parameters = IndexMap::new();
        for (name, value) in &self.parameter_group.parameters {
            parameters.insert(name.clone(), json!(value));
        }
        template.metadata.insert(
            "DatabaseParameterOverrides".to_string(),
            json!({
                "Parameters": parameters,
                "Note": "rds.force_ssl is 0 because the proxy fails to negotiate with an instance that forces TLS",
            }),
        );
        template.metadata.insert(
            "Environment".to_string(),
            json!({
                "Name": self.environment,
                "Region": self.config.region,
                "Account": self.config.account_id,
            }),
        );

        template.add_parameter(
            CODE_BUCKET_PARAMETER,
            Parameter::string("S3 bucket holding the migration function package"),
        );
        template.add_parameter(
            CODE_KEY_PARAMETER,
            Parameter::string("S3 key of the migration function package (zip with bootstrap and migrations/)"),
        );

        self.credentials.add_to(&mut template)?;
        self.lambda_sg.add_to(&mut template)?;
        self.db_sg.add_to(&mut template)?;
        self.parameter_group.add_to(&mut template)?;
        self.instance.add_to(&mut template)?;
        self.proxy_role.add_to(&mut template)?;
        self.proxy.add_to(&mut template)?;
        self.migrator.add_to(&mut template)?;

        template.add_output(
            "ProxyEndpoint",
            "Endpoint of the database proxy",
            self.proxy.endpoint(),
        );
        template.add_output(
            "DatabaseEndpoint",
            "Endpoint address of the database instance",
            self.instance.endpoint_address(),
        );
        template.add_output(
            "SecretArn",
            "ARN of the database credentials secret",
            self.credentials.secret_arn(),
        );
        template.add_output(
            "MigratorFunctionName",
            "Name of the migration function",
            reference(&self.migrator.function.logical_id),
        );
        template.add_output(
            "MigratorFunctionArn",
            "ARN of the migration function",
            self.migrator.function_arn(),
        );

        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environments;

    fn build(name: &str) -> DatabaseStack {
        let environments = Environments::builtin().unwrap();
        DatabaseStack::build(name, environments.get(name).unwrap()).unwrap()
    }

    #[test]
    fn test_backup_retention_per_environment() {
        assert_eq!(build("staging").instance.backup_retention_days, 0);
        assert_eq!(build("prod").instance.backup_retention_days, 30);
        assert_eq!(build("prod").backup_retention(), Duration::from_secs(30 * 86_400));
    }

    #[test]
    fn test_three_ingress_sources() {
        let stack = build("staging");
        let sources = stack.ingress_sources();
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0], &stack.db_sg.as_peer());
        assert_eq!(sources[1], &stack.lambda_sg.as_peer());
        assert_eq!(sources[2], &Peer::Ipv4(stack.vpc.cidr_block));
    }

    #[test]
    fn test_proxy_settings() {
        let stack = build("staging");
        assert!(stack.proxy.iam_auth);
        assert!(stack.proxy.debug_logging);
        assert_eq!(stack.proxy.security_group_ids, vec![stack.db_sg.logical_id.clone()]);
    }

    #[test]
    fn test_migrator_grants() {
        let stack = build("prod");
        let actions: Vec<&str> = stack
            .migrator
            .grants()
            .statements
            .iter()
            .flat_map(|s| s.actions.iter().map(String::as_str))
            .collect();
        assert_eq!(
            actions,
            vec![
                "secretsmanager:GetSecretValue",
                "secretsmanager:DescribeSecret",
                "rds-db:connect"
            ]
        );
    }
}
