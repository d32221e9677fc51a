use std::path::Path;

use aws_ssm_parameter::ParameterPath;
use blogstack::assets::LocalAssetPublisher;
use blogstack::config::{StackConfig, DEFAULT_API_TEMPLATE};
use blogstack::deploy::{Deployer, Units};
use blogstack::engine::{EngineError, LocalEngine};
use blogstack::error::DeployError;
use blogstack::stacks::{bridge, edge, web, StackDeployment, ASSET_BUCKET_PARAMETER, WEB_STACK_NAME};
use blogstack::token::DeploymentToken;
use serde_json::json;

const ACCOUNT: &str = "123456789012";
const REGION: &str = "eu-west-2";
const EDGE_REGION: &str = "us-east-1";

fn write_fixtures(dir: &Path) {
    std::fs::create_dir_all(dir.join("edge")).unwrap();
    std::fs::write(dir.join("edge").join("index.js"), "exports.handler = async (e) => e.Records[0].cf.request;").unwrap();
    std::fs::write(dir.join("parameter-bridge"), b"\x7fELF bridge").unwrap();
    std::fs::write(dir.join("hello-world"), b"\x7fELF api").unwrap();
    std::fs::create_dir_all(dir.join("public").join("blog")).unwrap();
    std::fs::write(dir.join("public").join("index.html"), "<h1>home</h1>").unwrap();
    std::fs::write(dir.join("public").join("blog").join("index.html"), "<h1>blog</h1>").unwrap();
}

fn config(dir: &Path) -> StackConfig {
    StackConfig {
        domain_name: "example.com".into(),
        target_account: ACCOUNT.into(),
        region: REGION.into(),
        api_lambda_path: dir.join("hello-world"),
        lambda_edge_lambda_path: dir.join("edge"),
        bridge_lambda_path: dir.join("parameter-bridge"),
        web_assets: dir.join("public"),
        hosted_zone_id: Some("Z0123456789".into()),
        certificate_arn: None,
        enable_api: false,
        api_template: DEFAULT_API_TEMPLATE.to_string(),
    }
}

async fn deploy(config: &StackConfig, engine: &LocalEngine, units: Units) -> Result<blogstack::deploy::DeploymentReport, DeployError> {
    let assets = LocalAssetPublisher::new(ACCOUNT);
    Deployer::new(config, engine, &assets).deploy(units).await
}

fn edge_parameter(engine: &LocalEngine) -> Option<String> {
    engine.parameter(EDGE_REGION, &ParameterPath::lambda_edge_version())
}

#[tokio::test]
async fn parameter_matches_the_association() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = config(dir.path());
    let engine = LocalEngine::new(ACCOUNT);

    let report = deploy(&config, &engine, Units::All).await.unwrap();

    let published = edge_parameter(&engine).unwrap();
    let associated = engine.association(REGION, WEB_STACK_NAME).await.unwrap();
    assert_eq!(published, associated);
    assert!(published.starts_with("arn:aws:lambda:us-east-1:123456789012:function:"));
    assert!(published.ends_with(":1"));
    assert_eq!(report.edge_outputs.unwrap()[edge::VERSION_ARN_OUTPUT], published);
    assert_eq!(report.web_outputs.unwrap()[web::ASSOCIATED_VERSION_OUTPUT], published);
    assert_eq!(report.website_files, 2);
    // nothing leaks into the web region
    assert_eq!(engine.parameter(REGION, &ParameterPath::lambda_edge_version()), None);
}

#[tokio::test]
async fn web_before_edge_is_an_ordering_error() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let mut config = config(dir.path());
    config.certificate_arn = Some("arn:aws:acm:us-east-1:123456789012:certificate/abc".into());
    let engine = LocalEngine::new(ACCOUNT);

    for _ in 0..2 {
        let err = deploy(&config, &engine, Units::Web).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        match err {
            DeployError::Engine(EngineError::ResourceFailed { resource, reason, .. }) => {
                assert_eq!(resource, bridge::BRIDGE_RESOURCE);
                assert!(reason.contains("/blog/lambdaEdgeLambdaVersion does not exist in us-east-1"));
            }
            other => panic!("expected ordering error, got {other}"),
        }
    }
    assert!(engine.stack(REGION, WEB_STACK_NAME).await.is_none());
    assert_eq!(engine.resolve_dns("example.com").await, None);
}

#[tokio::test]
async fn web_without_certificate_needs_the_edge_stack() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let engine = LocalEngine::new(ACCOUNT);
    let err = deploy(&config(dir.path()), &engine, Units::Web).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(matches!(err, DeployError::MissingOutput { .. }));
    let message = err.to_string();
    assert!(message.contains("Apply the edge function stack in us-east-1 before this one"), "{message}");
    assert!(message.contains("/blog/lambdaEdgeLambdaVersion"), "{message}");
}

#[tokio::test]
async fn redeploying_web_picks_up_a_new_version() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = config(dir.path());
    let engine = LocalEngine::new(ACCOUNT);

    deploy(&config, &engine, Units::All).await.unwrap();
    let v1 = edge_parameter(&engine).unwrap();

    std::fs::write(dir.path().join("edge").join("index.js"), "exports.handler = async () => ({ status: '301' });").unwrap();
    deploy(&config, &engine, Units::Edge).await.unwrap();
    let v2 = edge_parameter(&engine).unwrap();
    assert_ne!(v1, v2);
    assert!(v2.ends_with(":2"));
    // the distribution only moves when the web stack is applied again
    assert_eq!(engine.association(REGION, WEB_STACK_NAME).await.unwrap(), v1);

    deploy(&config, &engine, Units::Web).await.unwrap();
    assert_eq!(engine.association(REGION, WEB_STACK_NAME).await.unwrap(), v2);

    let retained: Vec<String> = engine.retained().await.into_iter().map(|r| r.physical_id).collect();
    assert!(retained.contains(&v1));
}

#[tokio::test]
async fn every_web_deployment_gets_a_new_token() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = config(dir.path());
    let engine = LocalEngine::new(ACCOUNT);

    let first = deploy(&config, &engine, Units::All).await.unwrap();
    let second = deploy(&config, &engine, Units::Web).await.unwrap();
    assert_ne!(first.token, second.token);

    let stack = engine.stack(REGION, WEB_STACK_NAME).await.unwrap();
    assert_eq!(Some(stack.resources[bridge::BRIDGE_RESOURCE].physical_id.clone()), second.token);
}

#[tokio::test]
async fn apex_and_www_reach_the_same_distribution() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = config(dir.path());
    let engine = LocalEngine::new(ACCOUNT);

    let report = deploy(&config, &engine, Units::All).await.unwrap();
    let endpoint = report.web_outputs.unwrap()[web::DISTRIBUTION_DOMAIN_OUTPUT].clone();
    assert!(endpoint.ends_with(".cloudfront.net"));
    assert_eq!(engine.resolve_dns("example.com").await, Some(endpoint.clone()));
    assert_eq!(engine.resolve_dns("www.example.com").await, Some(endpoint));
}

#[tokio::test]
async fn api_is_served_through_the_distribution() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let mut config = config(dir.path());
    config.enable_api = true;
    let engine = LocalEngine::new(ACCOUNT);

    deploy(&config, &engine, Units::All).await.unwrap();
    let stack = engine.stack(REGION, WEB_STACK_NAME).await.unwrap();
    let api_id = stack.resources["HelloWorldApi"].physical_id.clone();
    let distribution = &stack.resources[web::DISTRIBUTION].properties["DistributionConfig"];
    assert_eq!(distribution["Origins"][1]["DomainName"], format!("{api_id}.execute-api.eu-west-2.amazonaws.com"));
    let uri = stack.resources["HelloWorldApi"].properties["Body"]["paths"]["/hello"]["get"]["x-amazon-apigateway-integration"]["uri"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(uri.starts_with("arn:aws:apigateway:eu-west-2:lambda:path/2015-03-31/functions/arn:aws:lambda:eu-west-2:123456789012:function:"));
}

#[tokio::test]
async fn missing_bundle_fails_before_anything_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let mut config = config(dir.path());
    config.bridge_lambda_path = dir.path().join("not-built-yet");
    let engine = LocalEngine::new(ACCOUNT);

    let err = deploy(&config, &engine, Units::All).await.unwrap_err();
    assert!(matches!(err, DeployError::Asset(_)));
    assert_eq!(edge_parameter(&engine), None);
}

#[tokio::test]
async fn bridge_without_read_permission_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = config(dir.path());
    let engine = LocalEngine::new(ACCOUNT);
    deploy(&config, &engine, Units::Edge).await.unwrap();

    let mut template = web::synth(&config, &DeploymentToken::fresh()).unwrap();
    let statement = &mut template.resources.get_mut(bridge::BRIDGE_ROLE).unwrap().properties["Policies"][0]["PolicyDocument"]["Statement"][0];
    statement["Resource"] = json!(["arn:aws:ssm:us-east-1:123456789012:parameter/some/other/parameter"]);
    let deployment = StackDeployment::new(WEB_STACK_NAME, REGION, template)
        .with_parameter(ASSET_BUCKET_PARAMETER, "blogstack-assets-123456789012-eu-west-2")
        .with_parameter(bridge::BRIDGE_CODE_KEY_PARAMETER, "assets/bridge_00000000.zip")
        .with_parameter(web::CERTIFICATE_PARAMETER, "arn:aws:acm:us-east-1:123456789012:certificate/abc");

    match engine.apply_stack(&deployment).await {
        Err(EngineError::PermissionDenied { action, resource, .. }) => {
            assert_eq!(action, "ssm:GetParameter");
            assert_eq!(resource, "arn:aws:ssm:us-east-1:123456789012:parameter/blog/lambdaEdgeLambdaVersion");
        }
        other => panic!("expected permission error, got {other:?}"),
    }
}
