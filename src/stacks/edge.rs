//! The stack publishing the Lambda@Edge rewrite function. Its only contract
//! with the web stack is the SSM parameter holding the current version ARN.

use aws_cfn_stack::{get_att, get_ref, sub, Resource, SavedTemplate, StackInput, TemplateParameter};
use serde_json::json;

use crate::assets::Asset;
use crate::config::StackConfig;
use crate::error::Result;
use crate::resources::{
    Certificate, Function, LogGroup, Role, StringParameter, Version, BASIC_EXECUTION_POLICY, EDGE_LAMBDA_PRINCIPAL,
    LAMBDA_PRINCIPAL,
};
use super::ASSET_BUCKET_PARAMETER;

pub const EDGE_CODE_KEY_PARAMETER: &str = "EdgeLambdaKey";
pub const HOSTED_ZONE_PARAMETER: &str = "HostedZoneId";

pub const EDGE_ROLE: &str = "EdgeLambdaRole";
pub const EDGE_FUNCTION: &str = "EdgeRewriteFunction";
pub const EDGE_LOG_GROUP: &str = "EdgeRewriteFunctionLogs";
pub const EDGE_VERSION_PARAMETER: &str = "EdgeRewriteFunctionVersionParameter";
pub const SITE_CERTIFICATE: &str = "SiteCertificate";

pub const VERSION_ARN_OUTPUT: &str = "EdgeFunctionVersionArn";
pub const CERTIFICATE_ARN_OUTPUT: &str = "CertificateArn";

/// New code means a new logical id, so CloudFormation publishes a new version
/// and retains the old one instead of trying to update it in place.
pub fn version_logical_id(edge_code: &Asset) -> String {
    format!("{EDGE_FUNCTION}Version{}", edge_code.hash_hex())
}

pub fn synth(config: &StackConfig, edge_code: &Asset) -> Result<SavedTemplate> {
    let mut stack = StackInput::new(super::EDGE_STACK_NAME);
    stack.description = Some(format!("Lambda@Edge request rewriting for {}", config.domain_name));
    stack.add_parameter(ASSET_BUCKET_PARAMETER, TemplateParameter::string("Bucket holding the edge function bundle"));
    stack.add_parameter(EDGE_CODE_KEY_PARAMETER, TemplateParameter::string("Key of the edge function bundle"));

    stack.add(Resource::new(EDGE_ROLE, Role {
        assumed_by: vec![LAMBDA_PRINCIPAL.to_string(), EDGE_LAMBDA_PRINCIPAL.to_string()],
        managed_policy_arns: vec![BASIC_EXECUTION_POLICY.to_string()],
        ..Default::default()
    }));
    stack.add(Resource::new(EDGE_FUNCTION, Function {
        description: Some(format!("Rewrites viewer requests for {}", config.domain_name)),
        role_arn: get_att(EDGE_ROLE, "Arn"),
        runtime: "nodejs20.x".into(),
        handler: "index.handler".into(),
        code_bucket: get_ref(ASSET_BUCKET_PARAMETER),
        code_key: get_ref(EDGE_CODE_KEY_PARAMETER),
        memory_size: 128,
        timeout: 5,
        edge: true,
        ..Default::default()
    }));
    stack.add(Resource::new(EDGE_LOG_GROUP, LogGroup {
        log_group_name: sub(&format!("/aws/lambda/${{{EDGE_FUNCTION}}}")),
        retention_in_days: 1,
    }));

    let version_id = version_logical_id(edge_code);
    stack.add(Resource::new(&version_id, Version {
        function_name: get_ref(EDGE_FUNCTION),
        description: Some(format!("code {}", edge_code.hash_hex())),
    }));
    stack.add(Resource::new(EDGE_VERSION_PARAMETER, StringParameter {
        name: config.edge_parameter_path(),
        value: get_ref(&version_id),
        description: Some("Current version ARN of the CloudFront rewrite function".into()),
    }));

    let certificate_arn = match &config.certificate_arn {
        Some(arn) => json!(arn),
        None => {
            stack.add_parameter(HOSTED_ZONE_PARAMETER, TemplateParameter::string("Route53 zone used to validate the certificate"));
            stack.add(Resource::new(SITE_CERTIFICATE, Certificate {
                domain_name: config.domain_name.clone(),
                subject_alternative_names: vec![config.www_domain()],
                hosted_zone_id: get_ref(HOSTED_ZONE_PARAMETER),
            }));
            get_ref(SITE_CERTIFICATE)
        }
    };

    stack.add_output(VERSION_ARN_OUTPUT, "Version ARN published to the parameter store", get_ref(&version_id));
    stack.add_output(CERTIFICATE_ARN_OUTPUT, "Certificate for the CloudFront distribution", certificate_arn);
    Ok(stack.to_template()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::test_support::{asset, config};
    use aws_cfn_stack::DeletionPolicy;

    #[test]
    fn parameter_holds_the_version_arn() {
        let template = synth(&config(), &asset("edge", 0xabc)).unwrap();
        let param = &template.resources[EDGE_VERSION_PARAMETER];
        assert_eq!(param.properties["Name"], "/blog/lambdaEdgeLambdaVersion");
        assert_eq!(param.properties["Value"], json!({ "Ref": "EdgeRewriteFunctionVersion00000abc" }));
        assert_eq!(template.outputs[VERSION_ARN_OUTPUT].value, param.properties["Value"]);
    }

    #[test]
    fn new_code_gets_a_new_retained_version() {
        let a = synth(&config(), &asset("edge", 1)).unwrap();
        let b = synth(&config(), &asset("edge", 2)).unwrap();
        let version_a = version_logical_id(&asset("edge", 1));
        assert!(a.resources.contains_key(&version_a));
        assert!(!b.resources.contains_key(&version_a));
        assert_eq!(a.resources[&version_a].deletion_policy, Some(DeletionPolicy::Retain));
        assert_eq!(a.resources[&version_a].update_replace_policy, Some(DeletionPolicy::Retain));
    }

    #[test]
    fn edge_function_limits() {
        let template = synth(&config(), &asset("edge", 1)).unwrap();
        let function = &template.resources[EDGE_FUNCTION].properties;
        assert_eq!(function["Timeout"], 5);
        assert_eq!(function["MemorySize"], 128);
        assert_eq!(function["Handler"], "index.handler");
        assert_eq!(template.resources[EDGE_LOG_GROUP].properties["RetentionInDays"], 1);
    }

    #[test]
    fn certificate_only_when_not_supplied() {
        let template = synth(&config(), &asset("edge", 1)).unwrap();
        assert!(template.resources.contains_key(SITE_CERTIFICATE));
        assert!(template.parameters.contains_key(HOSTED_ZONE_PARAMETER));
        let sans = &template.resources[SITE_CERTIFICATE].properties["SubjectAlternativeNames"];
        assert_eq!(sans, &json!(["www.example.com"]));

        let mut with_cert = config();
        with_cert.certificate_arn = Some("arn:aws:acm:us-east-1:123456789012:certificate/abc".into());
        let template = synth(&with_cert, &asset("edge", 1)).unwrap();
        assert!(!template.resources.contains_key(SITE_CERTIFICATE));
        assert!(!template.parameters.contains_key(HOSTED_ZONE_PARAMETER));
        assert_eq!(template.outputs[CERTIFICATE_ARN_OUTPUT].value, "arn:aws:acm:us-east-1:123456789012:certificate/abc");
    }
}
