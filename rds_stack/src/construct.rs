//! Reusable Lambda construct
//!
//! Wraps the pattern every function in this stack follows: create an execution
//! role, attach inline and managed policies, create the function on that role,
//! and register invocation permissions.

use serde_json::Value;

use crate::error::Result;
use crate::resources::{
    DatabaseProxy, DatabaseSecret, FunctionConfig, LambdaFunction, ManagedPolicy, Permission,
    Policy, PolicyDocument, PolicyStatement, Role, ServicePrincipal,
};
use crate::template::Template;
use crate::utils::{logical_id, scoped_logical_id};

/// Managed policy every function role receives
pub const BASIC_EXECUTION_POLICY: &str = "service-role/AWSLambdaBasicExecutionRole";
/// Name of the single inline policy holding caller-supplied statements
pub const INLINE_POLICY_NAME: &str = "INLINE_POLICY";
pub const LAMBDA_SERVICE_PRINCIPAL: &str = "lambda.amazonaws.com";

/// Inputs of the [`Lambda`] construct
#[derive(Debug, Clone)]
pub struct LambdaProps {
    pub function_name: String,
    pub function_role_desc: String,
    pub function_role_name: String,
    pub policy_statements: Vec<PolicyStatement>,
    pub managed_policies: Vec<ManagedPolicy>,
    pub permissions: Vec<Permission>,
    pub config: FunctionConfig,
}

impl LambdaProps {
    pub fn new(
        function_name: impl Into<String>,
        function_role_name: impl Into<String>,
        function_role_desc: impl Into<String>,
        config: FunctionConfig,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            function_role_desc: function_role_desc.into(),
            function_role_name: function_role_name.into(),
            policy_statements: Vec::new(),
            managed_policies: Vec::new(),
            permissions: Vec::new(),
            config,
        }
    }

    pub fn policy_statement(mut self, statement: PolicyStatement) -> Self {
        self.policy_statements.push(statement);
        self
    }

    pub fn managed_policy(mut self, policy: ManagedPolicy) -> Self {
        self.managed_policies.push(policy);
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }
}

/// A function with its execution role and invocation permissions
#[derive(Debug, Clone)]
pub struct Lambda {
    pub role: Role,
    pub function: LambdaFunction,
    /// Invocation grants with their order-derived ids
    pub permissions: Vec<(String, Permission)>,
    grants: PolicyDocument,
}

impl Lambda {
    pub fn new(props: LambdaProps) -> Self {
        let LambdaProps {
            function_name,
            function_role_desc,
            function_role_name,
            policy_statements,
            mut managed_policies,
            permissions,
            config,
        } = props;

        managed_policies.push(ManagedPolicy::aws_managed(BASIC_EXECUTION_POLICY));

        let mut role = Role::new(
            &function_role_name,
            ServicePrincipal::new(LAMBDA_SERVICE_PRINCIPAL),
        );
        role.description = Some(function_role_desc);
        role.managed_policies = managed_policies;
        if !policy_statements.is_empty() {
            role.inline_policies.insert(
                INLINE_POLICY_NAME.to_string(),
                PolicyDocument::new(policy_statements),
            );
        }

        let function = LambdaFunction {
            logical_id: logical_id(&function_name),
            function_name,
            role_arn: role.arn(),
            config,
            depends_on: vec![role.logical_id.clone()],
        };

        let permissions = permissions
            .into_iter()
            .enumerate()
            .map(|(i, permission)| (format!("lambda_permission_{}", i + 1), permission))
            .collect();

        Self {
            role,
            function,
            permissions,
            grants: PolicyDocument::default(),
        }
    }

    pub fn function_arn(&self) -> Value {
        self.function.arn()
    }

    /// Statements granted after construction, see [`Lambda::grant`]
    pub fn grants(&self) -> &PolicyDocument {
        &self.grants
    }

    /// Attach an extra statement to the execution role
    ///
    /// Grants land in a separate default policy so the resource being granted
    /// can be declared after the role.
    pub fn grant(&mut self, statement: PolicyStatement) {
        self.grants.add_statement(statement);
        let policy_id = self.default_policy_id();
        if !self.function.depends_on.contains(&policy_id) {
            self.function.depends_on.push(policy_id);
        }
    }

    /// Allow the function to read a secret's value
    pub fn grant_secret_read(&mut self, secret: &DatabaseSecret) {
        self.grant(PolicyStatement::allow(
            ["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"],
            vec![secret.secret_arn()],
        ));
    }

    /// Allow the function to connect through a proxy as a database user
    pub fn grant_proxy_connect(&mut self, proxy: &DatabaseProxy, db_user: &str) {
        self.grant(PolicyStatement::allow(
            ["rds-db:connect"],
            vec![proxy.connect_arn(db_user)],
        ));
    }

    fn default_policy_id(&self) -> String {
        scoped_logical_id(&self.role.logical_id, "default-policy")
    }

    /// Declares the role, any grants, the function and its permissions
    pub fn add_to(&self, template: &mut Template) -> Result<()> {
        self.role.add_to(template)?;

        if !self.grants.is_empty() {
            Policy {
                logical_id: self.default_policy_id(),
                policy_name: self.default_policy_id(),
                document: self.grants.clone(),
                roles: vec![self.role.logical_id.clone()],
            }
            .add_to(template)?;
        }

        self.function.add_to(template)?;

        for (id, permission) in &self.permissions {
            template.add_resource(
                scoped_logical_id(&self.function.logical_id, id),
                permission.to_resource(&self.function),
            )?;
        }

        Ok(())
    }
}
