//! Lambda function resources

use indexmap::IndexMap;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::Result;
use crate::resources::intrinsic::get_att;
use crate::template::{Resource, Template};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    ProvidedAl2023,
    ProvidedAl2,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::ProvidedAl2023 => "provided.al2023",
            Runtime::ProvidedAl2 => "provided.al2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Arm64,
    X86_64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Arm64 => "arm64",
            Architecture::X86_64 => "x86_64",
        }
    }
}

/// Where the deployment package lives
#[derive(Debug, Clone, PartialEq)]
pub enum Code {
    S3 { bucket: Value, key: Value },
}

impl Code {
    fn to_json(&self) -> Value {
        match self {
            Code::S3 { bucket, key } => json!({ "S3Bucket": bucket, "S3Key": key }),
        }
    }
}

/// Subnets and security groups for a function attached to a VPC
#[derive(Debug, Clone, PartialEq)]
pub struct VpcPlacement {
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
}

/// Runtime settings of a function, independent of its permissions
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionConfig {
    pub runtime: Runtime,
    pub architecture: Architecture,
    pub handler: String,
    pub timeout: Duration,
    pub memory_mb: u32,
    pub environment: IndexMap<String, Value>,
    pub code: Code,
    pub vpc: Option<VpcPlacement>,
}

impl FunctionConfig {
    /// Defaults for a Rust function built as a `bootstrap` binary
    pub fn rust(code: Code) -> Self {
        Self {
            runtime: Runtime::ProvidedAl2023,
            architecture: Architecture::Arm64,
            handler: "bootstrap".to_string(),
            timeout: Duration::from_secs(3),
            memory_mb: 128,
            environment: IndexMap::new(),
            code,
            vpc: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambdaFunction {
    pub logical_id: String,
    pub function_name: String,
    pub role_arn: Value,
    pub config: FunctionConfig,
    /// Resources that must exist before the function is created
    pub depends_on: Vec<String>,
}

impl LambdaFunction {
    pub fn arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    pub fn add_to(&self, template: &mut Template) -> Result<()> {
        let config = &self.config;
        let mut properties = json!({
            "Architectures": [config.architecture.as_str()],
            "Code": config.code.to_json(),
            "FunctionName": self.function_name,
            "Handler": config.handler,
            "MemorySize": config.memory_mb,
            "Role": self.role_arn,
            "Runtime": config.runtime.as_str(),
            "Timeout": config.timeout.as_secs(),
        });
        if !config.environment.is_empty() {
            properties["Environment"] = json!({ "Variables": config.environment });
        }
        if let Some(vpc) = &config.vpc {
            properties["VpcConfig"] = json!({
                "SecurityGroupIds": vpc
                    .security_group_ids
                    .iter()
                    .map(|id| get_att(id, "GroupId"))
                    .collect::<Vec<_>>(),
                "SubnetIds": vpc.subnet_ids,
            });
        }

        let mut resource = Resource::new("AWS::Lambda::Function", properties);
        for dependency in &self.depends_on {
            resource = resource.depends_on(dependency.clone());
        }
        template.add_resource(self.logical_id.clone(), resource)
    }
}

/// A grant allowing a principal to invoke a function
#[derive(Debug, Clone, PartialEq)]
pub struct Permission {
    pub principal: String,
    pub action: String,
    pub source_arn: Option<Value>,
    pub source_account: Option<Value>,
}

impl Permission {
    /// `lambda:InvokeFunction` for a principal such as `events.amazonaws.com`
    pub fn invoke(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            action: "lambda:InvokeFunction".to_string(),
            source_arn: None,
            source_account: None,
        }
    }

    pub fn source_arn(mut self, arn: Value) -> Self {
        self.source_arn = Some(arn);
        self
    }

    pub fn source_account(mut self, account: Value) -> Self {
        self.source_account = Some(account);
        self
    }

    pub fn to_resource(&self, function: &LambdaFunction) -> Resource {
        let mut properties = json!({
            "Action": self.action,
            "FunctionName": function.arn(),
            "Principal": self.principal,
        });
        if let Some(arn) = &self.source_arn {
            properties["SourceArn"] = arn.clone();
        }
        if let Some(account) = &self.source_account {
            properties["SourceAccount"] = account.clone();
        }
        Resource::new("AWS::Lambda::Permission", properties)
    }
}
