//! Naming utilities for CloudFormation logical ids
//!
//! Resources are declared with the kebab- or snake-case names operators see in
//! the console (`db-sg`, `lambda_permission_1`). CloudFormation logical ids
//! must be alphanumeric, so every declared name is converted here.

use inflector::Inflector;

/// Maximum length CloudFormation accepts for a logical id
pub const MAX_LOGICAL_ID_LENGTH: usize = 255;

/// Convert a resource name into a CloudFormation logical id
pub fn logical_id(name: &str) -> String {
    let mut id: String = name
        .to_pascal_case()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    // Logical ids may not start with a digit
    if id.chars().next().map_or(false, |c| c.is_ascii_digit()) {
        id.insert(0, 'R');
    }

    id.truncate(MAX_LOGICAL_ID_LENGTH);
    id
}

/// Logical id of a resource owned by another one, e.g. a role's default policy
pub fn scoped_logical_id(owner_id: &str, name: &str) -> String {
    let mut id = format!("{}{}", owner_id, logical_id(name));
    id.truncate(MAX_LOGICAL_ID_LENGTH);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_id() {
        assert_eq!(logical_id("db-sg"), "DbSg");
        assert_eq!(logical_id("lambda-sg"), "LambdaSg");
        assert_eq!(logical_id("lambda_permission_1"), "LambdaPermission1");
        assert_eq!(logical_id("migrator-function-role"), "MigratorFunctionRole");
        assert_eq!(logical_id("db-parameter-group"), "DbParameterGroup");
    }

    #[test]
    fn test_logical_id_leading_digit() {
        assert!(logical_id("2-subnet").starts_with("R2"));
    }

    #[test]
    fn test_scoped_logical_id() {
        assert_eq!(
            scoped_logical_id("MigratorFunction", "lambda_permission_2"),
            "MigratorFunctionLambdaPermission2"
        );
    }
}
