//! IAM roles, policies and statements

use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::error::Result;
use crate::resources::intrinsic::{get_att, reference, sub};
use crate::template::{Resource, Template};
use crate::utils::logical_id;

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

/// One statement of a policy document
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<Value>,
}

impl PolicyStatement {
    pub fn allow<A, S>(actions: A, resources: Vec<Value>) -> Self
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            effect: Effect::Allow,
            actions: actions.into_iter().map(Into::into).collect(),
            resources,
        }
    }

    pub fn to_json(&self) -> Value {
        let action = if self.actions.len() == 1 {
            json!(self.actions[0])
        } else {
            json!(self.actions)
        };
        let resource = if self.resources.len() == 1 {
            self.resources[0].clone()
        } else {
            Value::Array(self.resources.clone())
        };

        json!({
            "Action": action,
            "Effect": self.effect.as_str(),
            "Resource": resource,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDocument {
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self { statements }
    }

    pub fn add_statement(&mut self, statement: PolicyStatement) {
        self.statements.push(statement);
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "Statement": self.statements.iter().map(PolicyStatement::to_json).collect::<Vec<_>>(),
            "Version": POLICY_VERSION,
        })
    }
}

/// A managed policy attached to a role by ARN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPolicy {
    pub name: String,
}

impl ManagedPolicy {
    /// An AWS managed policy, e.g. `service-role/AWSLambdaBasicExecutionRole`
    pub fn aws_managed(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn arn(&self) -> Value {
        sub(&format!(
            "arn:${{AWS::Partition}}:iam::aws:policy/{}",
            self.name
        ))
    }
}

/// Service allowed to assume a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePrincipal(pub String);

impl ServicePrincipal {
    pub fn new(service: impl Into<String>) -> Self {
        Self(service.into())
    }

    fn assume_role_policy(&self) -> Value {
        json!({
            "Statement": [{
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": { "Service": self.0 },
            }],
            "Version": POLICY_VERSION,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub logical_id: String,
    pub role_name: String,
    pub description: Option<String>,
    pub assumed_by: ServicePrincipal,
    pub managed_policies: Vec<ManagedPolicy>,
    pub inline_policies: IndexMap<String, PolicyDocument>,
}

impl Role {
    pub fn new(role_name: &str, assumed_by: ServicePrincipal) -> Self {
        Self {
            logical_id: logical_id(role_name),
            role_name: role_name.to_string(),
            description: None,
            assumed_by,
            managed_policies: Vec::new(),
            inline_policies: IndexMap::new(),
        }
    }

    pub fn arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    pub fn add_to(&self, template: &mut Template) -> Result<()> {
        let mut properties = json!({
            "AssumeRolePolicyDocument": self.assumed_by.assume_role_policy(),
            "RoleName": self.role_name,
        });
        if let Some(description) = &self.description {
            properties["Description"] = json!(description);
        }
        if !self.managed_policies.is_empty() {
            properties["ManagedPolicyArns"] = Value::Array(
                self.managed_policies.iter().map(ManagedPolicy::arn).collect(),
            );
        }
        if !self.inline_policies.is_empty() {
            properties["Policies"] = Value::Array(
                self.inline_policies
                    .iter()
                    .map(|(name, document)| {
                        json!({
                            "PolicyDocument": document.to_json(),
                            "PolicyName": name,
                        })
                    })
                    .collect(),
            );
        }

        template.add_resource(self.logical_id.clone(), Resource::new("AWS::IAM::Role", properties))
    }
}

/// A standalone policy attached to roles after they are created
///
/// Used for grants added to a role that is declared elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub logical_id: String,
    pub policy_name: String,
    pub document: PolicyDocument,
    pub roles: Vec<String>,
}

impl Policy {
    pub fn add_to(&self, template: &mut Template) -> Result<()> {
        template.add_resource(
            self.logical_id.clone(),
            Resource::new(
                "AWS::IAM::Policy",
                json!({
                    "PolicyDocument": self.document.to_json(),
                    "PolicyName": self.policy_name,
                    "Roles": self.roles.iter().map(|id| reference(id)).collect::<Vec<_>>(),
                }),
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_action_statement() {
        let statement = PolicyStatement::allow(["secretsmanager:GetSecretValue"], vec![json!("arn")]);
        assert_eq!(
            statement.to_json(),
            json!({
                "Action": "secretsmanager:GetSecretValue",
                "Effect": "Allow",
                "Resource": "arn",
            })
        );
    }

    #[test]
    fn test_managed_policy_arn() {
        let policy = ManagedPolicy::aws_managed("service-role/AWSLambdaBasicExecutionRole");
        assert_eq!(
            policy.arn(),
            json!({ "Fn::Sub": "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole" })
        );
    }

    #[test]
    fn test_role_without_inline_policy() {
        let role = Role::new("db-proxy-role", ServicePrincipal::new("rds.amazonaws.com"));
        let mut template = Template::new("test");
        role.add_to(&mut template).unwrap();

        let resource = template.resource("DbProxyRole").unwrap();
        assert!(resource.property("Policies").is_none());
        assert_eq!(
            resource.properties["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"],
            "rds.amazonaws.com"
        );
    }
}
