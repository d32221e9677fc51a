use aws_cfn_stack::CfnResource;
use serde_json::{json, Map, Value};

use super::policy::{policy_document, PolicyStatement};

pub const LAMBDA_PRINCIPAL: &str = "lambda.amazonaws.com";
pub const EDGE_LAMBDA_PRINCIPAL: &str = "edgelambda.amazonaws.com";
pub const API_GATEWAY_PRINCIPAL: &str = "apigateway.amazonaws.com";
pub const BASIC_EXECUTION_POLICY: &str = "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

pub struct InlinePolicy {
    pub name: String,
    pub statements: Vec<PolicyStatement>,
}

#[derive(Default)]
pub struct Role {
    /// physical name. Leave empty to let CloudFormation generate one.
    /// Max 64 characters.
    pub role_name: Option<String>,
    /// service principals allowed to assume this role.
    pub assumed_by: Vec<String>,
    pub managed_policy_arns: Vec<String>,
    pub inline_policies: Vec<InlinePolicy>,
}

impl Role {
    /// Execution role for a regular Lambda function: logs only.
    pub fn lambda_execution() -> Self {
        Self {
            assumed_by: vec![LAMBDA_PRINCIPAL.to_string()],
            managed_policy_arns: vec![BASIC_EXECUTION_POLICY.to_string()],
            ..Default::default()
        }
    }

    pub fn with_policy(mut self, name: &str, statements: Vec<PolicyStatement>) -> Self {
        self.inline_policies.push(InlinePolicy { name: name.to_string(), statements });
        self
    }
}

impl CfnResource for Role {
    fn type_string(&self) -> &'static str {
        "AWS::IAM::Role"
    }

    fn properties(&self) -> Value {
        let mut props = Map::new();
        props.insert("AssumeRolePolicyDocument".into(), json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": self.assumed_by },
                "Action": "sts:AssumeRole",
            }],
        }));
        if let Some(name) = &self.role_name {
            props.insert("RoleName".into(), json!(name));
        }
        if !self.managed_policy_arns.is_empty() {
            props.insert("ManagedPolicyArns".into(), json!(self.managed_policy_arns));
        }
        if !self.inline_policies.is_empty() {
            let policies: Vec<Value> = self.inline_policies.iter()
                .map(|p| json!({ "PolicyName": p.name, "PolicyDocument": policy_document(&p.statements) }))
                .collect();
            props.insert("Policies".into(), Value::Array(policies));
        }
        Value::Object(props)
    }

    fn validate(&self) -> Result<(), String> {
        if self.assumed_by.is_empty() {
            return Err("Role must be assumable by at least one service principal".to_string());
        }
        if let Some(name) = &self.role_name {
            let valid_chars = name.chars().all(|c| c.is_ascii_alphanumeric() || "+=,.@_-".contains(c));
            if name.is_empty() || name.len() > 64 || !valid_chars {
                return Err(format!("Invalid role name {:?}\nMust be 1-64 characters of [A-Za-z0-9+=,.@_-]", name));
            }
        }
        for policy in self.inline_policies.iter() {
            for statement in policy.statements.iter() {
                statement.validate().map_err(|e| format!("policy {}: {e}", policy.name))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_role_trusts_both_principals() {
        let role = Role {
            assumed_by: vec![LAMBDA_PRINCIPAL.into(), EDGE_LAMBDA_PRINCIPAL.into()],
            managed_policy_arns: vec![BASIC_EXECUTION_POLICY.into()],
            ..Default::default()
        };
        assert!(role.validate().is_ok());
        let props = role.properties();
        let principals = &props["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"];
        assert_eq!(principals, &json!(["lambda.amazonaws.com", "edgelambda.amazonaws.com"]));
        assert!(props.get("Policies").is_none());
    }

    #[test]
    fn rejects_bad_roles() {
        assert!(Role::default().validate().is_err());
        let role = Role { role_name: Some("has space".into()), ..Role::lambda_execution() };
        assert!(role.validate().is_err());
        let role = Role::lambda_execution().with_policy("bad", vec![PolicyStatement::allow(&["GetParameter"], vec![json!("*")])]);
        assert!(role.validate().unwrap_err().contains("policy bad"));
    }
}
