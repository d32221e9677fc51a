//! Optional hello world API, served by CloudFront under `/api/*`.

use std::collections::BTreeMap;

use aws_cfn_stack::{get_att, get_ref, sub, Resource, StackInput, TemplateParameter};
use serde_json::json;

use crate::config::StackConfig;
use crate::error::Result;
use crate::openapi::{self, HELLO_WORLD_VARIABLE};
use crate::resources::{
    ApiBehavior, Deployment, Function, LogGroup, Permission, PolicyStatement, RestApi, Role, Stage,
    API_GATEWAY_PRINCIPAL,
};
use super::ASSET_BUCKET_PARAMETER;

pub const API_CODE_KEY_PARAMETER: &str = "ApiLambdaKey";

pub const API_FUNCTION: &str = "HelloWorldLambda";
pub const API_LOG_GROUP: &str = "HelloWorldLambdaLogs";
pub const API_FUNCTION_ROLE: &str = "HelloWorldLambdaRole";
pub const API_GATEWAY_ROLE: &str = "ApiGatewayRole";
pub const API_INVOKE_PERMISSION: &str = "ApiGatewayInvokePermission";
pub const REST_API: &str = "HelloWorldApi";
pub const API_DEPLOYMENT: &str = "HelloWorldApiDeployment";
pub const API_STAGE: &str = "HelloWorldApiStage";
pub const API_STAGE_NAME: &str = "api";

/// What `{{helloworld-lambda}}` becomes: the integration URI of the function.
pub fn invocation_uri() -> String {
    format!("arn:aws:apigateway:${{AWS::Region}}:lambda:path/2015-03-31/functions/${{{API_FUNCTION}.Arn}}/invocations")
}

/// The OpenAPI template with its variables filled in.
pub fn rendered_spec(config: &StackConfig) -> Result<String> {
    let vars = BTreeMap::from([(HELLO_WORLD_VARIABLE.to_string(), invocation_uri())]);
    Ok(openapi::render(&config.api_template, &vars)?)
}

pub fn synth_into(stack: &mut StackInput, config: &StackConfig) -> Result<ApiBehavior> {
    let body = openapi::to_api_body(&rendered_spec(config)?)?;
    stack.add_parameter(API_CODE_KEY_PARAMETER, TemplateParameter::string("Key of the hello world bundle"));

    stack.add(Resource::new(API_FUNCTION_ROLE, Role::lambda_execution()));
    stack.add(Resource::new(API_FUNCTION, Function {
        description: Some("Hello world API".into()),
        role_arn: get_att(API_FUNCTION_ROLE, "Arn"),
        code_bucket: get_ref(ASSET_BUCKET_PARAMETER),
        code_key: get_ref(API_CODE_KEY_PARAMETER),
        memory_size: 256,
        timeout: 10,
        ..Default::default()
    }));
    stack.add(Resource::new(API_LOG_GROUP, LogGroup {
        log_group_name: sub(&format!("/aws/lambda/${{{API_FUNCTION}}}")),
        retention_in_days: 7,
    }));

    stack.add(Resource::new(API_GATEWAY_ROLE, Role {
        role_name: Some("ApiGatewayLambdaExecutionRole".into()),
        assumed_by: vec![API_GATEWAY_PRINCIPAL.to_string()],
        ..Default::default()
    }.with_policy("ApiGatewayLambdaExecution", vec![
        PolicyStatement::allow(&["logs:*"], vec![json!("*")]),
        PolicyStatement::allow(&["lambda:InvokeFunction"], vec![get_att(API_FUNCTION, "Arn")]),
    ])));
    stack.add(Resource::new(API_INVOKE_PERMISSION, Permission {
        function_name: get_att(API_FUNCTION, "Arn"),
        principal: API_GATEWAY_PRINCIPAL.to_string(),
        source_arn: Some(sub("arn:aws:execute-api:${AWS::Region}:${AWS::AccountId}:*")),
    }));

    stack.add(Resource::new(REST_API, RestApi { name: "HelloWorld".into(), body }));
    stack.add(
        Resource::new(API_DEPLOYMENT, Deployment {
            rest_api_id: get_ref(REST_API),
            description: format!("Hello world API for {}", config.domain_name),
        })
        .depending_on(API_INVOKE_PERMISSION),
    );
    stack.add(Resource::new(API_STAGE, Stage {
        stage_name: API_STAGE_NAME.into(),
        rest_api_id: get_ref(REST_API),
        deployment_id: get_ref(API_DEPLOYMENT),
    }));

    Ok(ApiBehavior {
        domain_name: sub(&format!("${{{REST_API}}}.execute-api.${{AWS::Region}}.amazonaws.com")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::test_support::config;

    fn synth() -> (aws_cfn_stack::SavedTemplate, ApiBehavior) {
        let mut stack = StackInput::new("ApiOnly");
        stack.add_parameter(ASSET_BUCKET_PARAMETER, TemplateParameter::string("assets"));
        let behavior = synth_into(&mut stack, &config()).unwrap();
        (stack.to_template().unwrap(), behavior)
    }

    #[test]
    fn spec_points_at_the_function() {
        let rendered = rendered_spec(&config()).unwrap();
        assert!(rendered.contains("functions/${HelloWorldLambda.Arn}/invocations"));
        assert!(!rendered.contains("{{"));

        let (template, _) = synth();
        let body = &template.resources[REST_API].properties["Body"];
        let uri = &body["paths"]["/hello"]["get"]["x-amazon-apigateway-integration"]["uri"];
        assert_eq!(uri, &json!({ "Fn::Sub": invocation_uri() }));
    }

    #[test]
    fn function_sizing_and_logs() {
        let (template, _) = synth();
        assert_eq!(template.resources[API_FUNCTION].properties["MemorySize"], 256);
        assert_eq!(template.resources[API_FUNCTION].properties["Timeout"], 10);
        assert_eq!(template.resources[API_LOG_GROUP].properties["RetentionInDays"], 7);
        assert_eq!(template.resources[API_STAGE].properties["StageName"], "api");
    }

    #[test]
    fn unresolved_variable_fails() {
        let mut c = config();
        c.api_template = "uri: {{something-else}}".into();
        let mut stack = StackInput::new("ApiOnly");
        assert!(synth_into(&mut stack, &c).is_err());
    }

    #[test]
    fn behavior_targets_regional_endpoint() {
        let (_, behavior) = synth();
        assert_eq!(behavior.domain_name, json!({ "Fn::Sub": "${HelloWorldApi}.execute-api.${AWS::Region}.amazonaws.com" }));
    }
}
