//! The website stack: bucket, distribution and DNS, plus the bridge that
//! supplies the edge function version the distribution associates with.

use aws_cfn_stack::{get_att, get_ref, sub, Resource, SavedTemplate, StackInput, TemplateParameter};
use serde_json::json;

use crate::config::StackConfig;
use crate::error::Result;
use crate::resources::{
    AliasRecord, Bucket, BucketPolicy, Distribution, OriginAccessIdentity, PolicyStatement, CLOUDFRONT_HOSTED_ZONE_ID,
};
use crate::token::DeploymentToken;
use super::bridge;

pub const CERTIFICATE_PARAMETER: &str = "CertificateArn";

pub const WEBSITE_BUCKET: &str = "WebsiteBucket";
pub const WEBSITE_OAI: &str = "WebsiteOriginAccessIdentity";
pub const WEBSITE_BUCKET_POLICY: &str = "WebsiteBucketPolicy";
pub const DISTRIBUTION: &str = "SiteDistribution";
pub const APEX_RECORD: &str = "SiteAliasRecord";
pub const WWW_RECORD: &str = "WwwSiteAliasRecord";

pub const DISTRIBUTION_DOMAIN_OUTPUT: &str = "DistributionDomainName";
pub const DISTRIBUTION_ID_OUTPUT: &str = "DistributionId";
pub const BUCKET_NAME_OUTPUT: &str = "WebsiteBucketName";
pub const ASSOCIATED_VERSION_OUTPUT: &str = "AssociatedEdgeVersionArn";

/// `token` must be fresh for every deployment, otherwise CloudFormation sees
/// an unchanged bridge and keeps the previously read version.
pub fn synth(config: &StackConfig, token: &DeploymentToken) -> Result<SavedTemplate> {
    let mut stack = StackInput::new(super::WEB_STACK_NAME);
    stack.description = Some(format!("Static website for {}", config.domain_name));
    stack.add_parameter(super::ASSET_BUCKET_PARAMETER, TemplateParameter::string("Bucket holding the function bundles"));
    stack.add_parameter(CERTIFICATE_PARAMETER, TemplateParameter::string("us-east-1 certificate for the site aliases"));

    stack.add(Resource::new(WEBSITE_BUCKET, Bucket {
        bucket_name: config.website_bucket_name(),
        index_document: Some("index.html".into()),
        destroy_with_stack: true,
    }));
    stack.add(Resource::new(WEBSITE_OAI, OriginAccessIdentity {
        comment: format!("OAI for {}", config.domain_name),
    }));
    stack.add(Resource::new(WEBSITE_BUCKET_POLICY, BucketPolicy {
        bucket: get_ref(WEBSITE_BUCKET),
        statements: vec![
            PolicyStatement::allow(&["s3:GetObject"], vec![sub(&format!("${{{WEBSITE_BUCKET}.Arn}}/*"))])
                .with_principal(json!({ "CanonicalUser": get_att(WEBSITE_OAI, "S3CanonicalUserId") })),
        ],
    }));

    let associated_version = bridge::synth_into(&mut stack, config, token);

    let mut distribution = Distribution::new(
        format!("CloudFront distribution for {}", config.domain_name),
        vec![config.domain_name.clone(), config.www_domain()],
        get_ref(CERTIFICATE_PARAMETER),
        get_att(WEBSITE_BUCKET, "RegionalDomainName"),
        get_ref(WEBSITE_OAI),
    );
    distribution.viewer_request_function = Some(associated_version.clone());
    if config.enable_api {
        distribution.api = Some(super::api::synth_into(&mut stack, config)?);
    }
    stack.add(Resource::new(DISTRIBUTION, distribution).depending_on(bridge::BRIDGE_RESOURCE));

    // records live in the domain's own zone, whatever its depth
    let zone = format!("{}.", config.domain_name);
    for (logical_id, name) in [(APEX_RECORD, config.domain_name.clone()), (WWW_RECORD, config.www_domain())] {
        let mut record = AliasRecord::new(&name, get_att(DISTRIBUTION, "DomainName"), CLOUDFRONT_HOSTED_ZONE_ID);
        record.hosted_zone_name = zone.clone();
        stack.add(Resource::new(logical_id, record));
    }

    stack.add_output(DISTRIBUTION_DOMAIN_OUTPUT, "CloudFront domain name", get_att(DISTRIBUTION, "DomainName"));
    stack.add_output(DISTRIBUTION_ID_OUTPUT, "CloudFront distribution id", get_ref(DISTRIBUTION));
    stack.add_output(BUCKET_NAME_OUTPUT, "Bucket serving the website", get_ref(WEBSITE_BUCKET));
    stack.add_output(ASSOCIATED_VERSION_OUTPUT, "Edge function version in use", associated_version);
    Ok(stack.to_template()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::api::{API_CODE_KEY_PARAMETER, REST_API};
    use crate::stacks::test_support::config;

    #[test]
    fn distribution_waits_for_the_bridge() {
        let template = synth(&config(), &DeploymentToken::fresh()).unwrap();
        let distribution = &template.resources[DISTRIBUTION];
        assert!(distribution.depends_on.contains(&bridge::BRIDGE_RESOURCE.to_string()));
        let assoc = &distribution.properties["DistributionConfig"]["DefaultCacheBehavior"]["LambdaFunctionAssociations"][0];
        assert_eq!(assoc["LambdaFunctionARN"], get_att(bridge::BRIDGE_RESOURCE, "Parameter.Value"));
        assert_eq!(template.outputs[ASSOCIATED_VERSION_OUTPUT].value, assoc["LambdaFunctionARN"]);
    }

    #[test]
    fn apex_and_www_point_at_the_distribution() {
        let template = synth(&config(), &DeploymentToken::fresh()).unwrap();
        let apex = &template.resources[APEX_RECORD].properties;
        let www = &template.resources[WWW_RECORD].properties;
        assert_eq!(apex["Name"], "example.com");
        assert_eq!(www["Name"], "www.example.com");
        assert_eq!(apex["AliasTarget"], www["AliasTarget"]);
        assert_eq!(apex["HostedZoneName"], "example.com.");
    }

    #[test]
    fn subdomain_sites_use_their_own_zone() {
        let mut c = config();
        c.domain_name = "blog.example.co.uk".into();
        let template = synth(&c, &DeploymentToken::fresh()).unwrap();
        assert_eq!(template.resources[WWW_RECORD].properties["HostedZoneName"], "blog.example.co.uk.");
    }

    #[test]
    fn bucket_is_private_to_the_oai() {
        let template = synth(&config(), &DeploymentToken::fresh()).unwrap();
        assert_eq!(template.resources[WEBSITE_BUCKET].properties["BucketName"], "website-123456789012");
        let statement = &template.resources[WEBSITE_BUCKET_POLICY].properties["PolicyDocument"]["Statement"][0];
        assert_eq!(statement["Action"], json!(["s3:GetObject"]));
        assert_eq!(statement["Principal"]["CanonicalUser"], get_att(WEBSITE_OAI, "S3CanonicalUserId"));
    }

    #[test]
    fn api_is_opt_in() {
        let template = synth(&config(), &DeploymentToken::fresh()).unwrap();
        assert!(!template.resources.contains_key(REST_API));
        assert!(!template.parameters.contains_key(API_CODE_KEY_PARAMETER));

        let mut c = config();
        c.enable_api = true;
        let template = synth(&c, &DeploymentToken::fresh()).unwrap();
        assert!(template.resources.contains_key(REST_API));
        let behaviors = &template.resources[DISTRIBUTION].properties["DistributionConfig"]["CacheBehaviors"];
        assert_eq!(behaviors[0]["PathPattern"], "api/*");
    }
}
