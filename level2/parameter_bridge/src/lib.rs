//! Custom resource that reads an SSM parameter at deployment time and hands
//! its value back to CloudFormation as the `Parameter.Value` attribute.
//!
//! The resource's physical id is whatever `PhysicalResourceId` property the
//! template supplies. Templates put a fresh token there on every synthesis so
//! the resource is updated, and the parameter re-read, on every deployment.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_ssm_parameter::{ParameterError, ParameterPath, ParameterStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const BRIDGE_RESOURCE_TYPE: &str = "Custom::ParameterBridge";
pub const BRIDGE_OUTPUT_ATTRIBUTE: &str = "Parameter.Value";

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("Parameter {name} does not exist in {region}. Apply the edge function stack that publishes it before this one")]
    MissingParameter { name: String, region: String },

    #[error("Invalid resource properties: {0}")]
    InvalidProperties(String),

    #[error(transparent)]
    Store(#[from] ParameterError),

    #[error("Failed to deliver response to CloudFormation: {0}")]
    Respond(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceRequest {
    pub request_type: RequestType,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    #[serde(default)]
    pub resource_type: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BridgeProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<String>,
    pub parameter_name: String,
    pub parameter_region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl CustomResourceResponse {
    fn for_request(request: &CustomResourceRequest, status: ResponseStatus, physical_resource_id: String) -> Self {
        Self {
            status,
            reason: None,
            physical_resource_id,
            stack_id: request.stack_id.clone(),
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
            data: BTreeMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Anything that can answer CloudFormation custom resource requests.
#[async_trait]
pub trait CustomResourceProvider: Send + Sync {
    async fn handle(&self, request: &CustomResourceRequest) -> CustomResourceResponse;
}

pub struct ParameterBridge<S> {
    store: S,
}

impl<S: ParameterStore> ParameterBridge<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// One point-in-time read. Nothing is cached between calls.
    pub async fn read(&self, props: &BridgeProperties) -> Result<String, BridgeError> {
        let path = ParameterPath::new(&props.parameter_name)?;
        match self.store.get_parameter(&props.parameter_region, &path).await? {
            Some(value) => Ok(value),
            None => Err(BridgeError::MissingParameter {
                name: props.parameter_name.clone(),
                region: props.parameter_region.clone(),
            }),
        }
    }
}

pub fn parse_properties(value: &Value) -> Result<BridgeProperties, BridgeError> {
    serde_json::from_value(value.clone()).map_err(|e| BridgeError::InvalidProperties(e.to_string()))
}

/// Physical id to answer with when the request carries none of its own.
fn fallback_physical_id(request: &CustomResourceRequest) -> String {
    request.physical_resource_id.clone()
        .unwrap_or_else(|| format!("{}-{}", request.logical_resource_id, request.request_id))
}

#[async_trait]
impl<S: ParameterStore> CustomResourceProvider for ParameterBridge<S> {
    async fn handle(&self, request: &CustomResourceRequest) -> CustomResourceResponse {
        if request.request_type == RequestType::Delete {
            // nothing was created, nothing to clean up
            return CustomResourceResponse::for_request(request, ResponseStatus::Success, fallback_physical_id(request));
        }
        let props = match parse_properties(&request.resource_properties) {
            Ok(p) => p,
            Err(e) => {
                let mut resp = CustomResourceResponse::for_request(request, ResponseStatus::Failed, fallback_physical_id(request));
                resp.reason = Some(e.to_string());
                return resp;
            }
        };
        let physical_id = props.physical_resource_id.clone().unwrap_or_else(|| fallback_physical_id(request));
        match self.read(&props).await {
            Ok(value) => {
                tracing::info!(
                    parameter = %props.parameter_name,
                    region = %props.parameter_region,
                    token = %physical_id,
                    "read parameter"
                );
                let mut resp = CustomResourceResponse::for_request(request, ResponseStatus::Success, physical_id);
                resp.data.insert(BRIDGE_OUTPUT_ATTRIBUTE.to_string(), value);
                resp
            }
            Err(e) => {
                tracing::error!(parameter = %props.parameter_name, error = %e, "parameter read failed");
                let mut resp = CustomResourceResponse::for_request(request, ResponseStatus::Failed, physical_id);
                resp.reason = Some(e.to_string());
                resp
            }
        }
    }
}

/// Delivers the response to the pre-signed S3 URL CloudFormation is waiting
/// on. The URL is signed without a content type, so none may be sent.
pub fn send_response(response_url: &str, response: &CustomResourceResponse) -> Result<(), BridgeError> {
    let body = serde_json::to_string(response).map_err(|e| BridgeError::Respond(e.to_string()))?;
    ureq::put(response_url)
        .set("Content-Type", "")
        .send_string(&body)
        .map_err(|e| BridgeError::Respond(e.to_string()))?;
    Ok(())
}
