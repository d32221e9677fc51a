use aws_cfn_stack::CfnResource;
use aws_ssm_parameter::ParameterPath;
use parameter_bridge::BRIDGE_RESOURCE_TYPE;
use serde_json::{json, Value};

use crate::token::DeploymentToken;

/// Custom resource backed by the parameter bridge function. Its
/// `Parameter.Value` attribute is the parameter's value at deploy time.
pub struct ParameterBridgeResource {
    pub service_token: Value,
    pub parameter_name: ParameterPath,
    pub parameter_region: String,
    pub token: DeploymentToken,
}

impl CfnResource for ParameterBridgeResource {
    fn type_string(&self) -> &'static str {
        BRIDGE_RESOURCE_TYPE
    }

    fn properties(&self) -> Value {
        json!({
            "ServiceToken": self.service_token,
            "ParameterName": self.parameter_name.as_str(),
            "ParameterRegion": self.parameter_region,
            "PhysicalResourceId": self.token.as_str(),
        })
    }

    fn validate(&self) -> Result<(), String> {
        aws_regions::verify_region(&self.parameter_region).map_or(Ok(()), Err)
    }
}
