//! The web stack's half of the cross-region hand-off: a small function that
//! reads the edge version parameter in us-east-1 at deploy time.

use aws_cfn_stack::{get_att, get_ref, Resource, StackInput, TemplateParameter};
use parameter_bridge::BRIDGE_OUTPUT_ATTRIBUTE;
use serde_json::{json, Value};

use crate::config::StackConfig;
use crate::resources::{Function, ParameterBridgeResource, PolicyStatement, Role};
use crate::token::DeploymentToken;
use super::ASSET_BUCKET_PARAMETER;

pub const BRIDGE_CODE_KEY_PARAMETER: &str = "BridgeLambdaKey";

pub const BRIDGE_ROLE: &str = "ParameterBridgeRole";
pub const BRIDGE_FUNCTION: &str = "ParameterBridgeFunction";
pub const BRIDGE_RESOURCE: &str = "LambdaEdgeVersionBridge";

/// Adds the provider role, provider function and the custom resource.
/// Returns the value the distribution should associate with.
pub fn synth_into(stack: &mut StackInput, config: &StackConfig, token: &DeploymentToken) -> Value {
    stack.add_parameter(BRIDGE_CODE_KEY_PARAMETER, TemplateParameter::string("Key of the parameter bridge bundle"));

    // exactly the one parameter, nothing else in the account
    stack.add(Resource::new(BRIDGE_ROLE, Role::lambda_execution().with_policy(
        "ReadEdgeVersionParameter",
        vec![PolicyStatement::allow(&["ssm:GetParameter"], vec![json!(config.edge_parameter_arn())])],
    )));
    stack.add(Resource::new(BRIDGE_FUNCTION, Function {
        description: Some(format!("Reads {} from {}", config.edge_parameter_path(), aws_regions::EDGE_REGION)),
        role_arn: get_att(BRIDGE_ROLE, "Arn"),
        code_bucket: get_ref(ASSET_BUCKET_PARAMETER),
        code_key: get_ref(BRIDGE_CODE_KEY_PARAMETER),
        architecture: Some("arm64".into()),
        ..Default::default()
    }));
    stack.add(
        Resource::new(BRIDGE_RESOURCE, ParameterBridgeResource {
            service_token: get_att(BRIDGE_FUNCTION, "Arn"),
            parameter_name: config.edge_parameter_path(),
            parameter_region: aws_regions::EDGE_REGION.to_string(),
            token: token.clone(),
        })
        .depending_on(BRIDGE_ROLE)
        .depending_on(BRIDGE_FUNCTION),
    );
    get_att(BRIDGE_RESOURCE, BRIDGE_OUTPUT_ATTRIBUTE)
}
