//! RDS resources: credentials secret, parameter group, instance and proxy

use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::error::Result;
use crate::resources::intrinsic::{
    get_att, join, reference, select, split, AWS_ACCOUNT_ID, AWS_PARTITION, AWS_REGION,
};
use crate::resources::network::SecurityGroup;
use crate::template::{Resource, Template};
use crate::utils::{logical_id, scoped_logical_id};

/// Characters left out of generated passwords; they break connection strings
pub const PASSWORD_EXCLUDE_CHARACTERS: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";

/// A Postgres engine version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresEngine {
    pub full_version: String,
    pub major_version: String,
}

impl PostgresEngine {
    pub fn version(full_version: &str) -> Self {
        let major_version = full_version
            .split('.')
            .next()
            .unwrap_or(full_version)
            .to_string();
        Self {
            full_version: full_version.to_string(),
            major_version,
        }
    }

    pub fn ver_15_3() -> Self {
        Self::version("15.3")
    }

    /// Parameter group family, e.g. `postgres15`
    pub fn parameter_group_family(&self) -> String {
        format!("postgres{}", self.major_version)
    }
}

/// What happens to a resource when it leaves the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPolicy {
    Destroy,
    Retain,
    Snapshot,
}

impl RemovalPolicy {
    pub fn as_cloudformation(&self) -> &'static str {
        match self {
            RemovalPolicy::Destroy => "Delete",
            RemovalPolicy::Retain => "Retain",
            RemovalPolicy::Snapshot => "Snapshot",
        }
    }
}

/// Generated master credentials, later attached to the instance
///
/// The attachment fills in `host`, `port`, `dbname` and `engine`, so the
/// final payload is `{username, password, host, port, dbname, engine, ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSecret {
    pub logical_id: String,
    pub secret_name: String,
    pub username: String,
}

impl DatabaseSecret {
    pub fn new(secret_name: &str, username: &str) -> Self {
        Self {
            logical_id: logical_id(secret_name),
            secret_name: secret_name.to_string(),
            username: username.to_string(),
        }
    }

    fn attachment_id(&self) -> String {
        scoped_logical_id(&self.logical_id, "attachment")
    }

    /// ARN of the secret once attached to its target
    pub fn secret_arn(&self) -> Value {
        reference(&self.attachment_id())
    }

    /// Dynamic reference resolving one field of the secret at deploy time
    fn resolve_field(&self, field: &str) -> Value {
        join(
            "",
            vec![
                json!("{{resolve:secretsmanager:"),
                reference(&self.logical_id),
                json!(format!(":SecretString:{}::}}}}", field)),
            ],
        )
    }

    pub fn add_to(&self, template: &mut Template) -> Result<()> {
        template.add_resource(
            self.logical_id.clone(),
            Resource::new(
                "AWS::SecretsManager::Secret",
                json!({
                    "GenerateSecretString": {
                        "ExcludeCharacters": PASSWORD_EXCLUDE_CHARACTERS,
                        "GenerateStringKey": "password",
                        "PasswordLength": 30,
                        "SecretStringTemplate": json!({ "username": self.username }).to_string(),
                    },
                    "Name": self.secret_name,
                }),
            )
            .deletion_policy(RemovalPolicy::Destroy.as_cloudformation()),
        )
    }

    fn add_attachment_to(&self, instance_id: &str, template: &mut Template) -> Result<()> {
        template.add_resource(
            self.attachment_id(),
            Resource::new(
                "AWS::SecretsManager::SecretTargetAttachment",
                json!({
                    "SecretId": reference(&self.logical_id),
                    "TargetId": reference(instance_id),
                    "TargetType": "AWS::RDS::DBInstance",
                }),
            ),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterGroup {
    pub logical_id: String,
    pub family: String,
    pub description: String,
    pub parameters: IndexMap<String, String>,
}

impl ParameterGroup {
    pub fn new(name: &str, engine: &PostgresEngine, description: &str) -> Self {
        Self {
            logical_id: logical_id(name),
            family: engine.parameter_group_family(),
            description: description.to_string(),
            parameters: IndexMap::new(),
        }
    }

    pub fn parameter(mut self, name: &str, value: &str) -> Self {
        self.parameters.insert(name.to_string(), value.to_string());
        self
    }

    pub fn add_to(&self, template: &mut Template) -> Result<()> {
        template.add_resource(
            self.logical_id.clone(),
            Resource::new(
                "AWS::RDS::DBParameterGroup",
                json!({
                    "Description": self.description,
                    "Family": self.family,
                    "Parameters": self.parameters,
                }),
            ),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubnetGroup {
    pub logical_id: String,
    pub description: String,
    pub subnet_ids: Vec<String>,
}

impl SubnetGroup {
    pub fn add_to(&self, template: &mut Template) -> Result<()> {
        template.add_resource(
            self.logical_id.clone(),
            Resource::new(
                "AWS::RDS::DBSubnetGroup",
                json!({
                    "DBSubnetGroupDescription": self.description,
                    "SubnetIds": self.subnet_ids,
                }),
            )
            .deletion_policy(RemovalPolicy::Destroy.as_cloudformation()),
        )
    }
}

/// The Postgres instance itself
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseInstance {
    pub logical_id: String,
    pub engine: PostgresEngine,
    pub instance_type: String,
    pub port: u16,
    pub database_name: String,
    pub subnet_group: SubnetGroup,
    pub security_group_ids: Vec<String>,
    pub credentials: DatabaseSecret,
    pub backup_retention_days: u32,
    pub delete_automated_backups: bool,
    pub removal_policy: RemovalPolicy,
    pub allocated_storage_gb: u32,
    pub parameter_group_id: String,
}

impl DatabaseInstance {
    pub fn endpoint_address(&self) -> Value {
        get_att(&self.logical_id, "Endpoint.Address")
    }

    /// Declares the subnet group, the instance and the secret attachment
    pub fn add_to(&self, template: &mut Template) -> Result<()> {
        self.subnet_group.add_to(template)?;

        let properties = json!({
            "AllocatedStorage": self.allocated_storage_gb.to_string(),
            "BackupRetentionPeriod": self.backup_retention_days,
            "CopyTagsToSnapshot": true,
            "DBInstanceClass": self.instance_type,
            "DBName": self.database_name,
            "DBParameterGroupName": reference(&self.parameter_group_id),
            "DBSubnetGroupName": reference(&self.subnet_group.logical_id),
            "DeleteAutomatedBackups": self.delete_automated_backups,
            "Engine": "postgres",
            "EngineVersion": self.engine.full_version,
            "MasterUsername": self.credentials.resolve_field("username"),
            "MasterUserPassword": self.credentials.resolve_field("password"),
            "Port": self.port.to_string(),
            "PubliclyAccessible": false,
            "StorageType": "gp2",
            "VPCSecurityGroups": self
                .security_group_ids
                .iter()
                .map(|id| get_att(id, "GroupId"))
                .collect::<Vec<_>>(),
        });

        template.add_resource(
            self.logical_id.clone(),
            Resource::new("AWS::RDS::DBInstance", properties)
                .deletion_policy(self.removal_policy.as_cloudformation()),
        )?;

        self.credentials
            .add_attachment_to(&self.logical_id, template)
    }
}

/// RDS Proxy in front of the instance, authenticating with the secret
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseProxy {
    pub logical_id: String,
    pub proxy_name: String,
    pub secret_arn: Value,
    pub role_arn: Value,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub instance_id: String,
    pub debug_logging: bool,
    pub iam_auth: bool,
    pub require_tls: bool,
}

impl DatabaseProxy {
    pub fn new(proxy_name: &str, instance: &DatabaseInstance, role_arn: Value) -> Self {
        Self {
            logical_id: logical_id(proxy_name),
            proxy_name: proxy_name.to_string(),
            secret_arn: instance.credentials.secret_arn(),
            role_arn,
            subnet_ids: instance.subnet_group.subnet_ids.clone(),
            security_group_ids: instance.security_group_ids.clone(),
            instance_id: instance.logical_id.clone(),
            debug_logging: false,
            iam_auth: false,
            require_tls: true,
        }
    }

    pub fn arn(&self) -> Value {
        get_att(&self.logical_id, "DBProxyArn")
    }

    pub fn endpoint(&self) -> Value {
        get_att(&self.logical_id, "Endpoint")
    }

    /// `rds-db:connect` resource for one database user through this proxy
    ///
    /// The proxy's resource id is the last segment of its ARN.
    pub fn connect_arn(&self, db_user: &str) -> Value {
        join(
            "",
            vec![
                json!("arn:"),
                reference(AWS_PARTITION),
                json!(":rds-db:"),
                reference(AWS_REGION),
                json!(":"),
                reference(AWS_ACCOUNT_ID),
                json!(":dbuser:"),
                select(6, split(":", self.arn())),
                json!(format!("/{}", db_user)),
            ],
        )
    }

    pub fn add_to(&self, template: &mut Template) -> Result<()> {
        template.add_resource(
            self.logical_id.clone(),
            Resource::new(
                "AWS::RDS::DBProxy",
                json!({
                    "Auth": [{
                        "AuthScheme": "SECRETS",
                        "IAMAuth": if self.iam_auth { "REQUIRED" } else { "DISABLED" },
                        "SecretArn": self.secret_arn,
                    }],
                    "DBProxyName": self.proxy_name,
                    "DebugLogging": self.debug_logging,
                    "EngineFamily": "POSTGRESQL",
                    "RequireTLS": self.require_tls,
                    "RoleArn": self.role_arn,
                    "VpcSecurityGroupIds": self
                        .security_group_ids
                        .iter()
                        .map(|id| get_att(id, "GroupId"))
                        .collect::<Vec<_>>(),
                    "VpcSubnetIds": self.subnet_ids,
                }),
            ),
        )?;

        template.add_resource(
            scoped_logical_id(&self.logical_id, "proxy-target-group"),
            Resource::new(
                "AWS::RDS::DBProxyTargetGroup",
                json!({
                    "ConnectionPoolConfigurationInfo": {},
                    "DBInstanceIdentifiers": [reference(&self.instance_id)],
                    "DBProxyName": reference(&self.logical_id),
                    "TargetGroupName": "default",
                }),
            ),
        )
    }
}

/// Security groups referenced by id, for callers holding the full groups
pub fn group_ids(groups: &[&SecurityGroup]) -> Vec<String> {
    groups.iter().map(|g| g.logical_id.clone()).collect()
}
