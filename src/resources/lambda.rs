use aws_cfn_stack::{CfnResource, DeletionPolicy};
use serde_json::{json, Map, Value};

/// Log retention periods CloudWatch accepts.
const VALID_RETENTION_DAYS: &[u32] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922, 3288, 3653,
];

pub struct Function {
    /// physical name. None lets CloudFormation pick one.
    /// max 64 characters.
    pub function_name: Option<String>,
    pub description: Option<String>,
    pub role_arn: Value,
    pub runtime: String,
    pub handler: String,
    pub code_bucket: Value,
    pub code_key: Value,
    /// memory to give your function (in MB). Defaults to 128.
    /// Valid values: 128 - 10240
    pub memory_size: u64,
    /// timeout of your function (in seconds). Defaults to 30.
    /// Valid values: 1 - 900
    pub timeout: u32,
    pub architecture: Option<String>,
    /// replicated to CloudFront edge locations. Lambda@Edge only allows
    /// x86_64 and, for viewer triggers, 128 MB and at most 5 seconds.
    pub edge: bool,
}

impl Default for Function {
    fn default() -> Self {
        Self {
            function_name: None,
            description: None,
            role_arn: Value::Null,
            runtime: "provided.al2023".into(),
            handler: "bootstrap".into(),
            code_bucket: Value::Null,
            code_key: Value::Null,
            memory_size: 128,
            timeout: 30,
            architecture: None,
            edge: false,
        }
    }
}

impl CfnResource for Function {
    fn type_string(&self) -> &'static str {
        "AWS::Lambda::Function"
    }

    fn properties(&self) -> Value {
        let mut props = Map::new();
        if let Some(name) = &self.function_name {
            props.insert("FunctionName".into(), json!(name));
        }
        if let Some(description) = &self.description {
            props.insert("Description".into(), json!(description));
        }
        props.insert("Role".into(), self.role_arn.clone());
        props.insert("Runtime".into(), json!(self.runtime));
        props.insert("Handler".into(), json!(self.handler));
        props.insert("Code".into(), json!({ "S3Bucket": self.code_bucket, "S3Key": self.code_key }));
        props.insert("MemorySize".into(), json!(self.memory_size));
        props.insert("Timeout".into(), json!(self.timeout));
        if let Some(arch) = &self.architecture {
            props.insert("Architectures".into(), json!([arch]));
        }
        Value::Object(props)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.function_name {
            if name.len() > 64 {
                return Err(format!("Invalid function name {:?}\nMust be at most 64 characters", name));
            }
        }
        if self.memory_size < 128 || self.memory_size > 10240 {
            return Err(format!("Invalid memory size {:?}\nMust be between 128 and 10240", self.memory_size));
        }
        if self.timeout < 1 || self.timeout > 900 {
            return Err(format!("Invalid timeout {:?}\nMust be between 1 and 900", self.timeout));
        }
        if self.role_arn.is_null() || self.code_bucket.is_null() || self.code_key.is_null() {
            return Err("Function needs a role and a code location".to_string());
        }
        if self.edge {
            if self.timeout > 5 {
                return Err(format!("Invalid timeout {:?}\nViewer request functions at the edge may run at most 5 seconds", self.timeout));
            }
            if self.memory_size != 128 {
                return Err(format!("Invalid memory size {:?}\nViewer request functions at the edge must use 128", self.memory_size));
            }
            if self.architecture.as_deref().unwrap_or("x86_64") != "x86_64" {
                return Err("Edge functions must run on x86_64".to_string());
            }
        }
        Ok(())
    }
}

/// One immutable publish of a function. Kept when superseded so a
/// distribution still pointing at it keeps working.
pub struct Version {
    pub function_name: Value,
    pub description: Option<String>,
}

impl CfnResource for Version {
    fn type_string(&self) -> &'static str {
        "AWS::Lambda::Version"
    }

    fn properties(&self) -> Value {
        let mut props = Map::new();
        props.insert("FunctionName".into(), self.function_name.clone());
        if let Some(description) = &self.description {
            props.insert("Description".into(), json!(description));
        }
        Value::Object(props)
    }

    fn deletion_policy(&self) -> Option<DeletionPolicy> {
        Some(DeletionPolicy::Retain)
    }
}

pub struct Permission {
    pub function_name: Value,
    pub principal: String,
    pub source_arn: Option<Value>,
}

impl CfnResource for Permission {
    fn type_string(&self) -> &'static str {
        "AWS::Lambda::Permission"
    }

    fn properties(&self) -> Value {
        let mut props = Map::new();
        props.insert("Action".into(), json!("lambda:InvokeFunction"));
        props.insert("FunctionName".into(), self.function_name.clone());
        props.insert("Principal".into(), json!(self.principal));
        if let Some(arn) = &self.source_arn {
            props.insert("SourceArn".into(), arn.clone());
        }
        Value::Object(props)
    }
}

pub struct LogGroup {
    pub log_group_name: Value,
    pub retention_in_days: u32,
}

impl CfnResource for LogGroup {
    fn type_string(&self) -> &'static str {
        "AWS::Logs::LogGroup"
    }

    fn properties(&self) -> Value {
        json!({
            "LogGroupName": self.log_group_name,
            "RetentionInDays": self.retention_in_days,
        })
    }

    fn validate(&self) -> Result<(), String> {
        if !VALID_RETENTION_DAYS.contains(&self.retention_in_days) {
            return Err(format!("Invalid retention {:?}\nMust be one of {:?}", self.retention_in_days, VALID_RETENTION_DAYS));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_cfn_stack::{get_att, get_ref};

    fn edge_function() -> Function {
        Function {
            role_arn: get_att("EdgeLambdaRole", "Arn"),
            runtime: "nodejs20.x".into(),
            handler: "index.handler".into(),
            code_bucket: get_ref("AssetBucket"),
            code_key: get_ref("EdgeLambdaKey"),
            timeout: 5,
            edge: true,
            ..Default::default()
        }
    }

    #[test]
    fn edge_limits_are_enforced() {
        assert!(edge_function().validate().is_ok());
        let f = Function { timeout: 30, ..edge_function() };
        assert!(f.validate().unwrap_err().contains("5 seconds"));
        let f = Function { memory_size: 256, ..edge_function() };
        assert!(f.validate().is_err());
        let f = Function { architecture: Some("arm64".into()), ..edge_function() };
        assert!(f.validate().is_err());
    }

    #[test]
    fn function_properties() {
        let props = edge_function().properties();
        assert_eq!(props["Code"]["S3Key"], json!({ "Ref": "EdgeLambdaKey" }));
        assert_eq!(props["MemorySize"], 128);
        assert!(props.get("FunctionName").is_none());
    }

    #[test]
    fn versions_are_retained() {
        let v = Version { function_name: get_ref("Fn"), description: None };
        assert_eq!(v.deletion_policy(), Some(DeletionPolicy::Retain));
    }

    #[test]
    fn log_retention_must_be_supported() {
        let lg = LogGroup { log_group_name: json!("/aws/lambda/x"), retention_in_days: 2 };
        assert!(lg.validate().is_err());
        let lg = LogGroup { log_group_name: json!("/aws/lambda/x"), retention_in_days: 7 };
        assert!(lg.validate().is_ok());
    }
}
