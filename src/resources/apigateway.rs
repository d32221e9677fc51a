use aws_cfn_stack::CfnResource;
use serde_json::{json, Value};

/// REST API defined entirely by an inline OpenAPI body.
pub struct RestApi {
    pub name: String,
    pub body: Value,
}

impl CfnResource for RestApi {
    fn type_string(&self) -> &'static str {
        "AWS::ApiGateway::RestApi"
    }

    fn properties(&self) -> Value {
        json!({
            "Name": self.name,
            "Body": self.body,
            "EndpointConfiguration": { "Types": ["REGIONAL"] },
        })
    }

    fn validate(&self) -> Result<(), String> {
        if !self.body.is_object() {
            return Err("RestApi body must be an OpenAPI document".to_string());
        }
        if self.body.get("paths").is_none() {
            return Err("RestApi body has no paths".to_string());
        }
        Ok(())
    }
}

pub struct Deployment {
    pub rest_api_id: Value,
    pub description: String,
}

impl CfnResource for Deployment {
    fn type_string(&self) -> &'static str {
        "AWS::ApiGateway::Deployment"
    }

    fn properties(&self) -> Value {
        json!({ "RestApiId": self.rest_api_id, "Description": self.description })
    }
}

pub struct Stage {
    pub stage_name: String,
    pub rest_api_id: Value,
    pub deployment_id: Value,
}

impl CfnResource for Stage {
    fn type_string(&self) -> &'static str {
        "AWS::ApiGateway::Stage"
    }

    fn properties(&self) -> Value {
        json!({
            "StageName": self.stage_name,
            "RestApiId": self.rest_api_id,
            "DeploymentId": self.deployment_id,
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.stage_name.is_empty() || !self.stage_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(format!("Invalid stage name {:?}", self.stage_name));
        }
        Ok(())
    }
}
