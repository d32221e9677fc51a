//! Ordered application of the two units: the edge stack publishes, the web
//! stack reads what was published.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use aws_cfn_stack::CfnClient;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_route53::error::DisplayErrorContext;
use serde::Serialize;

use crate::assets::{Asset, AssetError, AssetPublisher};
use crate::config::{normalize_zone_id, StackConfig};
use crate::error::{ConfigError, DeployError, Result};
use crate::stacks::{api, bridge, edge, web, StackDeployment, ASSET_BUCKET_PARAMETER, EDGE_STACK_NAME, WEB_STACK_NAME};
use crate::token::DeploymentToken;

/// Which deployment units to apply. `all` applies edge before web.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Edge,
    Web,
    All,
}

impl Units {
    pub fn includes_edge(self) -> bool {
        matches!(self, Units::Edge | Units::All)
    }

    pub fn includes_web(self) -> bool {
        matches!(self, Units::Web | Units::All)
    }
}

/// Something that can bring a stack to the state its template describes.
#[async_trait]
pub trait DeploymentEngine: Send + Sync {
    /// Applies the stack and returns its outputs once it has settled.
    async fn apply(&self, deployment: &StackDeployment) -> Result<BTreeMap<String, String>>;

    /// Outputs of an existing stack, None if it was never applied.
    async fn outputs(&self, stack_name: &str, region: &str) -> Result<Option<BTreeMap<String, String>>>;
}

#[derive(Default)]
pub struct CloudFormationEngine {
    clients: tokio::sync::Mutex<HashMap<String, Arc<CfnClient>>>,
}

impl CloudFormationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, region: &str) -> Arc<CfnClient> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(region) {
            return client.clone();
        }
        let client = Arc::new(CfnClient::new(region).await);
        clients.insert(region.to_string(), client.clone());
        client
    }
}

#[async_trait]
impl DeploymentEngine for CloudFormationEngine {
    async fn apply(&self, deployment: &StackDeployment) -> Result<BTreeMap<String, String>> {
        let body = deployment.template.to_json_pretty()?;
        let client = self.client(&deployment.region).await;
        Ok(client.deploy(&deployment.stack_name, &body, &deployment.parameters).await?)
    }

    async fn outputs(&self, stack_name: &str, region: &str) -> Result<Option<BTreeMap<String, String>>> {
        let client = self.client(region).await;
        Ok(client.stack_outputs(stack_name).await?)
    }
}

/// Finds the public Route53 zone named exactly `domain`.
pub async fn lookup_hosted_zone(domain: &str) -> Result<String> {
    let shared_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(aws_regions::EDGE_REGION))
        .load()
        .await;
    let client = aws_sdk_route53::Client::new(&shared_config);
    let wanted = format!("{domain}.");
    let resp = client.list_hosted_zones_by_name()
        .dns_name(&wanted)
        .max_items(5)
        .send()
        .await
        .map_err(|e| DeployError::Aws { service: "Route53", message: DisplayErrorContext(&e).to_string() })?;
    resp.hosted_zones().iter()
        .filter(|z| !z.config().map(|c| c.private_zone()).unwrap_or(false))
        .find(|z| z.name() == wanted)
        .map(|z| normalize_zone_id(z.id()))
        .ok_or_else(|| DeployError::Config(ConfigError::Invalid {
            field: "hostedZoneId",
            reason: format!("no public hosted zone named {wanted}. Pass --hostedZoneId"),
        }))
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DeploymentReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_outputs: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_outputs: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub website_files: usize,
}

struct Bundles {
    edge: Option<Asset>,
    bridge: Option<Asset>,
    api: Option<Asset>,
}

pub struct Deployer<'a> {
    config: &'a StackConfig,
    engine: &'a dyn DeploymentEngine,
    assets: &'a dyn AssetPublisher,
    hosted_zone_id: Option<String>,
}

impl<'a> Deployer<'a> {
    pub fn new(config: &'a StackConfig, engine: &'a dyn DeploymentEngine, assets: &'a dyn AssetPublisher) -> Self {
        Self { config, engine, assets, hosted_zone_id: config.hosted_zone_id.clone() }
    }

    pub fn with_hosted_zone(mut self, zone_id: Option<String>) -> Self {
        if zone_id.is_some() {
            self.hosted_zone_id = zone_id;
        }
        self
    }

    /// Every bundle the requested units need, packaged before anything is
    /// applied so a bad path fails the whole deployment up front.
    fn package(&self, units: Units) -> Result<Bundles> {
        let config = self.config;
        let edge = units.includes_edge()
            .then(|| Asset::from_path("edge", &config.lambda_edge_lambda_path))
            .transpose()?;
        let (bridge, api) = if units.includes_web() {
            if !config.web_assets.is_dir() {
                return Err(AssetError::Missing {
                    name: "website".to_string(),
                    path: config.web_assets.display().to_string(),
                }.into());
            }
            let bridge = Asset::from_path("bridge", &config.bridge_lambda_path)?;
            let api = config.enable_api
                .then(|| Asset::from_path("api", &config.api_lambda_path))
                .transpose()?;
            (Some(bridge), api)
        } else {
            (None, None)
        };
        Ok(Bundles { edge, bridge, api })
    }

    pub async fn deploy(&self, units: Units) -> Result<DeploymentReport> {
        let bundles = self.package(units)?;
        let mut report = DeploymentReport::default();
        if let Some(edge_code) = &bundles.edge {
            report.edge_outputs = Some(self.deploy_edge(edge_code).await?);
        }
        if let Some(bridge_code) = &bundles.bridge {
            let token = DeploymentToken::fresh();
            let (outputs, files) = self.deploy_web(bridge_code, bundles.api.as_ref(), &token).await?;
            report.web_outputs = Some(outputs);
            report.website_files = files;
            report.token = Some(token.to_string());
        }
        Ok(report)
    }

    async fn deploy_edge(&self, edge_code: &Asset) -> Result<BTreeMap<String, String>> {
        let region = aws_regions::EDGE_REGION;
        let location = self.assets.publish(edge_code, region).await?;
        let template = edge::synth(self.config, edge_code)?;
        let mut deployment = StackDeployment::new(EDGE_STACK_NAME, region, template)
            .with_parameter(ASSET_BUCKET_PARAMETER, &location.bucket)
            .with_parameter(edge::EDGE_CODE_KEY_PARAMETER, &location.key);
        if self.config.certificate_arn.is_none() {
            let zone = self.hosted_zone_id.as_deref().ok_or(ConfigError::Invalid {
                field: "hostedZoneId",
                reason: "needed to validate the certificate when --certificateArn is not given".to_string(),
            })?;
            deployment = deployment.with_parameter(edge::HOSTED_ZONE_PARAMETER, zone);
        }
        tracing::info!(stack = EDGE_STACK_NAME, region, code = %edge_code.hash_hex(), "applying edge stack");
        let outputs = self.engine.apply(&deployment).await?;
        if let Some(version) = outputs.get(edge::VERSION_ARN_OUTPUT) {
            tracing::info!(version = %version, parameter = %self.config.edge_parameter_path(), "edge version published");
        }
        Ok(outputs)
    }

    async fn certificate_arn(&self) -> Result<String> {
        if let Some(arn) = &self.config.certificate_arn {
            return Ok(arn.clone());
        }
        let outputs = self.engine.outputs(EDGE_STACK_NAME, aws_regions::EDGE_REGION).await?.unwrap_or_default();
        outputs.get(edge::CERTIFICATE_ARN_OUTPUT).cloned().ok_or_else(|| DeployError::MissingOutput {
            stack: EDGE_STACK_NAME.to_string(),
            output: edge::CERTIFICATE_ARN_OUTPUT.to_string(),
            hint: format!(
                "Apply the edge function stack in {} before this one, it publishes {} and the certificate",
                aws_regions::EDGE_REGION,
                self.config.edge_parameter_path(),
            ),
        })
    }

    async fn deploy_web(
        &self,
        bridge_code: &Asset,
        api_code: Option<&Asset>,
        token: &DeploymentToken,
    ) -> Result<(BTreeMap<String, String>, usize)> {
        let config = self.config;
        let certificate_arn = self.certificate_arn().await?;
        let bridge_location = self.assets.publish(bridge_code, &config.region).await?;
        let template = web::synth(config, token)?;
        let mut deployment = StackDeployment::new(WEB_STACK_NAME, &config.region, template)
            .with_parameter(ASSET_BUCKET_PARAMETER, &bridge_location.bucket)
            .with_parameter(bridge::BRIDGE_CODE_KEY_PARAMETER, &bridge_location.key)
            .with_parameter(web::CERTIFICATE_PARAMETER, &certificate_arn);
        if let Some(api_code) = api_code {
            let api_location = self.assets.publish(api_code, &config.region).await?;
            deployment = deployment.with_parameter(api::API_CODE_KEY_PARAMETER, &api_location.key);
        }
        tracing::info!(stack = WEB_STACK_NAME, region = %config.region, token = %token, "applying web stack");
        let outputs = self.engine.apply(&deployment).await?;
        if let Some(version) = outputs.get(web::ASSOCIATED_VERSION_OUTPUT) {
            tracing::info!(version = %version, "distribution associated with edge version");
        }
        let bucket = outputs.get(web::BUCKET_NAME_OUTPUT).cloned().unwrap_or_else(|| config.website_bucket_name());
        let files = self.assets.sync_website(&config.web_assets, &bucket, &config.region).await?;
        Ok((outputs, files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_selection() {
        assert!(Units::All.includes_edge() && Units::All.includes_web());
        assert!(Units::Edge.includes_edge() && !Units::Edge.includes_web());
        assert!(!Units::Web.includes_edge() && Units::Web.includes_web());
    }
}
