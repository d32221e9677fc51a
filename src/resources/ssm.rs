use aws_cfn_stack::CfnResource;
use aws_ssm_parameter::ParameterPath;
use serde_json::{json, Map, Value};

/// Plain `String` SSM parameter.
pub struct StringParameter {
    pub name: ParameterPath,
    pub value: Value,
    pub description: Option<String>,
}

impl CfnResource for StringParameter {
    fn type_string(&self) -> &'static str {
        "AWS::SSM::Parameter"
    }

    fn properties(&self) -> Value {
        let mut props = Map::new();
        props.insert("Name".into(), json!(self.name.as_str()));
        props.insert("Type".into(), json!("String"));
        props.insert("Value".into(), self.value.clone());
        if let Some(description) = &self.description {
            props.insert("Description".into(), json!(description));
        }
        Value::Object(props)
    }

    fn validate(&self) -> Result<(), String> {
        if let Value::String(s) = &self.value {
            if s.is_empty() || s.len() > 4096 {
                return Err(format!("Invalid value for {}\nMust be 1-4096 characters", self.name));
            }
        }
        Ok(())
    }
}
