//! Template synthesis for the two deployment units.

use std::collections::BTreeMap;

use aws_cfn_stack::SavedTemplate;
use serde::{Deserialize, Serialize};

pub mod api;
pub mod bridge;
pub mod edge;
pub mod web;

/// Publisher unit, always in us-east-1.
pub const EDGE_STACK_NAME: &str = "LambdaEdgeCloudFrontRewriteStack";
/// Composer unit, in the configured region.
pub const WEB_STACK_NAME: &str = "WebBackendStack";

/// Shared template parameter naming the bucket code bundles were published to.
pub const ASSET_BUCKET_PARAMETER: &str = "AssetBucket";

/// A synthesized template together with where and how to apply it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDeployment {
    pub stack_name: String,
    pub region: String,
    pub template: SavedTemplate,
    pub parameters: BTreeMap<String, String>,
}

impl StackDeployment {
    pub fn new(stack_name: &str, region: &str, template: SavedTemplate) -> Self {
        Self {
            stack_name: stack_name.to_string(),
            region: region.to_string(),
            template,
            parameters: Default::default(),
        }
    }

    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        self.parameters.insert(name.to_string(), value.to_string());
        self
    }

    /// template parameters that have neither a value nor a default.
    pub fn missing_parameters(&self) -> Vec<String> {
        self.template.parameters.iter()
            .filter(|(name, p)| p.default.is_none() && !self.parameters.contains_key(*name))
            .map(|(name, _)| name.clone())
            .collect()
    }
}
