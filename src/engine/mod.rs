//! In-process stand-in for CloudFormation and the services the stacks touch.
//! Applies the same templates the real deployment uses, runs custom resources
//! through their providers, and keeps the account's state in a serde file.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use aws_cfn_stack::DeletionPolicy;
use aws_ssm_parameter::{InMemoryParameterStore, ParameterPath};
use parameter_bridge::{
    parse_properties, CustomResourceProvider, CustomResourceRequest, ParameterBridge, RequestType,
    BRIDGE_RESOURCE_TYPE,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::deploy::DeploymentEngine;
use crate::resources::document_allows;
use crate::stacks::StackDeployment;

pub mod graph;
pub mod provision;
pub mod resolve;
pub mod state;

use provision::Provisioner;
use resolve::{stringify, Context};
pub use state::{stack_key, EngineState, ProvisionedResource, StackRecord};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{resource} refers to {reference}, which is neither a resource nor a parameter")]
    UnknownReference { resource: String, reference: String },

    #[error("Circular dependency between {0:?}")]
    Cycle(Vec<String>),

    #[error("{resource} has no attribute {attribute}")]
    UnknownAttribute { resource: String, attribute: String },

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Invalid property: {0}")]
    InvalidProperty(String),

    #[error("Stack {stack} is missing values for parameters {names:?}")]
    MissingParameter { stack: String, names: Vec<String> },

    #[error("Stack {stack} failed: {resource} {reason}")]
    ResourceFailed { stack: String, resource: String, reason: String },

    #[error("Role {role} is not allowed to perform {action} on {resource}")]
    PermissionDenied { role: String, action: String, resource: String },

    #[error("No provider registered for {0}")]
    NoProvider(String),

    #[error("State file error: {0}")]
    Io(String),

    #[error("State file is not valid: {0}")]
    Json(String),

    #[error("Stack {0} not found")]
    StackNotFound(String),
}

pub struct LocalEngine {
    account: String,
    state: tokio::sync::Mutex<EngineState>,
    parameters: Arc<InMemoryParameterStore>,
    providers: BTreeMap<String, Arc<dyn CustomResourceProvider>>,
    state_path: Option<PathBuf>,
}

impl LocalEngine {
    /// Empty account with the parameter bridge registered for its resource type.
    pub fn new(account: &str) -> Self {
        Self::from_state(account, EngineState::default(), None)
    }

    /// Loads `path` if it exists and writes back after every successful apply.
    pub fn with_state_file(account: &str, path: PathBuf) -> Result<Self, EngineError> {
        let state = EngineState::load(&path)?;
        Ok(Self::from_state(account, state, Some(path)))
    }

    fn from_state(account: &str, state: EngineState, state_path: Option<PathBuf>) -> Self {
        let parameters = Arc::new(InMemoryParameterStore::from_snapshot(state.parameters.clone()));
        let mut providers: BTreeMap<String, Arc<dyn CustomResourceProvider>> = BTreeMap::new();
        providers.insert(BRIDGE_RESOURCE_TYPE.to_string(), Arc::new(ParameterBridge::new(parameters.clone())));
        Self {
            account: account.to_string(),
            state: tokio::sync::Mutex::new(state),
            parameters,
            providers,
            state_path,
        }
    }

    pub fn register_provider(&mut self, resource_type: &str, provider: Arc<dyn CustomResourceProvider>) {
        self.providers.insert(resource_type.to_string(), provider);
    }

    pub fn parameter_store(&self) -> Arc<InMemoryParameterStore> {
        self.parameters.clone()
    }

    pub fn parameter(&self, region: &str, path: &ParameterPath) -> Option<String> {
        self.parameters.get(region, path)
    }

    pub async fn state(&self) -> EngineState {
        self.state.lock().await.clone()
    }

    pub async fn stack(&self, region: &str, stack_name: &str) -> Option<StackRecord> {
        self.state.lock().await.stacks.get(&stack_key(region, stack_name)).cloned()
    }

    pub async fn stack_outputs(&self, region: &str, stack_name: &str) -> Option<BTreeMap<String, String>> {
        self.stack(region, stack_name).await.map(|s| s.outputs)
    }

    /// The version ARN the stack's distribution triggers on viewer requests.
    pub async fn association(&self, region: &str, stack_name: &str) -> Option<String> {
        let stack = self.stack(region, stack_name).await?;
        stack.resources.values()
            .filter(|r| r.ty == "AWS::CloudFront::Distribution")
            .find_map(|r| {
                r.properties.pointer("/DistributionConfig/DefaultCacheBehavior/LambdaFunctionAssociations")?
                    .as_array()?
                    .iter()
                    .find(|a| a.get("EventType").and_then(Value::as_str) == Some("viewer-request"))?
                    .get("LambdaFunctionARN")?
                    .as_str()
                    .map(String::from)
            })
    }

    /// Follows alias records until a name with no record of its own.
    pub async fn resolve_dns(&self, name: &str) -> Option<String> {
        let state = self.state.lock().await;
        let mut current = name.trim_end_matches('.').to_ascii_lowercase();
        let mut hops = 0;
        while let Some(target) = state.dns.get(&current) {
            current = target.trim_end_matches('.').to_ascii_lowercase();
            hops += 1;
            if hops > 8 {
                return None;
            }
        }
        (hops > 0).then_some(current)
    }

    /// Resources kept after their stack stopped declaring them.
    pub async fn retained(&self) -> Vec<ProvisionedResource> {
        self.state.lock().await.retained.clone()
    }

    /// Applies one stack. On failure the account is left exactly as it was.
    pub async fn apply_stack(&self, deployment: &StackDeployment) -> Result<BTreeMap<String, String>, EngineError> {
        let missing = deployment.missing_parameters();
        if !missing.is_empty() {
            return Err(EngineError::MissingParameter { stack: deployment.stack_name.clone(), names: missing });
        }
        let mut state = self.state.lock().await;
        let before = state.clone();
        let parameters_before = self.parameters.snapshot();
        match self.apply_locked(&mut state, deployment).await {
            Ok(outputs) => {
                state.parameters = self.parameters.snapshot();
                if let Some(path) = &self.state_path {
                    state.save(path)?;
                }
                tracing::info!(stack = %deployment.stack_name, region = %deployment.region, "stack applied");
                Ok(outputs)
            }
            Err(e) => {
                *state = before;
                self.parameters.restore(parameters_before);
                tracing::error!(stack = %deployment.stack_name, error = %e, "stack rolled back");
                Err(e)
            }
        }
    }

    async fn apply_locked(
        &self,
        state: &mut EngineState,
        deployment: &StackDeployment,
    ) -> Result<BTreeMap<String, String>, EngineError> {
        let key = stack_key(&deployment.region, &deployment.stack_name);
        let previous = state.stacks.get(&key).map(|s| s.resources.clone()).unwrap_or_default();
        let order = graph::topological_order(&deployment.template)?;
        let provisioner = Provisioner {
            account: &self.account,
            region: &deployment.region,
            stack_name: &deployment.stack_name,
            parameters: &self.parameters,
        };

        let mut resources: BTreeMap<String, ProvisionedResource> = BTreeMap::new();
        let mut superseded: Vec<(ProvisionedResource, Option<DeletionPolicy>)> = vec![];
        for id in order.iter() {
            let saved = &deployment.template.resources[id];
            let properties = Context {
                account: &self.account,
                region: &deployment.region,
                stack_name: &deployment.stack_name,
                parameters: &deployment.parameters,
                resources: &resources,
                current: id,
            }.resolve(&saved.properties)?;
            let prev = previous.get(id).filter(|p| p.ty == saved.ty);
            if let Some(p) = prev.filter(|p| p.properties == properties) {
                tracing::debug!(resource = %id, "unchanged");
                resources.insert(id.clone(), p.clone());
                continue;
            }
            let action = if prev.is_some() { "updating" } else { "creating" };
            tracing::info!(stack = %deployment.stack_name, resource = %id, ty = %saved.ty, "{action}");
            let provisioned = if saved.ty.starts_with("Custom::") {
                self.run_custom_resource(deployment, id, saved.ty.as_str(), properties, prev, &resources).await?
            } else {
                provisioner.apply(state, id, saved, properties, prev, &resources)
                    .map_err(|e| self.failed(deployment, id, e))?
            };
            if let Some(p) = prev.filter(|p| p.physical_id != provisioned.physical_id) {
                superseded.push((p.clone(), saved.update_replace_policy));
            }
            resources.insert(id.clone(), provisioned);
        }
        for (id, resource) in previous.iter() {
            let replaced_by_other_type = resources.get(id).map(|r| r.ty != resource.ty).unwrap_or(false);
            if !resources.contains_key(id) || replaced_by_other_type {
                superseded.push((resource.clone(), resource.deletion_policy));
            }
        }

        let outputs = {
            let ctx = Context {
                account: &self.account,
                region: &deployment.region,
                stack_name: &deployment.stack_name,
                parameters: &deployment.parameters,
                resources: &resources,
                current: "Outputs",
            };
            let mut outputs = BTreeMap::new();
            for (name, output) in deployment.template.outputs.iter() {
                outputs.insert(name.clone(), stringify(&ctx.resolve(&output.value)?, name)?);
            }
            outputs
        };

        // newest first, like CloudFormation's cleanup phase
        for (resource, policy) in superseded.into_iter().rev() {
            if matches!(policy, Some(DeletionPolicy::Retain)) {
                tracing::info!(resource = %resource.logical_id, physical_id = %resource.physical_id, "retained");
                state.retained.push(resource);
            } else if resource.ty.starts_with("Custom::") {
                self.delete_custom_resource(deployment, &resource).await;
            } else {
                provisioner.delete(state, &resource);
            }
        }

        state.stacks.insert(key, StackRecord {
            name: deployment.stack_name.clone(),
            region: deployment.region.clone(),
            template: deployment.template.clone(),
            parameters: deployment.parameters.clone(),
            resources,
            outputs: outputs.clone(),
        });
        Ok(outputs)
    }

    fn failed(&self, deployment: &StackDeployment, resource: &str, e: EngineError) -> EngineError {
        match e {
            EngineError::InvalidProperty(reason) | EngineError::Unsupported(reason) => EngineError::ResourceFailed {
                stack: deployment.stack_name.clone(),
                resource: resource.to_string(),
                reason,
            },
            other => other,
        }
    }

    fn request(
        &self,
        deployment: &StackDeployment,
        request_type: RequestType,
        logical_id: &str,
        resource_type: &str,
        physical_resource_id: Option<String>,
        properties: Value,
        old_properties: Option<Value>,
    ) -> CustomResourceRequest {
        CustomResourceRequest {
            request_type,
            response_url: format!("local://{}/{logical_id}", deployment.stack_name),
            stack_id: format!(
                "arn:aws:cloudformation:{}:{}:stack/{}/local",
                deployment.region, self.account, deployment.stack_name
            ),
            request_id: format!("{logical_id}-{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            resource_type: resource_type.to_string(),
            logical_resource_id: logical_id.to_string(),
            physical_resource_id,
            resource_properties: properties,
            old_resource_properties: old_properties,
        }
    }

    async fn run_custom_resource(
        &self,
        deployment: &StackDeployment,
        logical_id: &str,
        resource_type: &str,
        properties: Value,
        previous: Option<&ProvisionedResource>,
        resources: &BTreeMap<String, ProvisionedResource>,
    ) -> Result<ProvisionedResource, EngineError> {
        let provider = self.providers.get(resource_type).ok_or_else(|| EngineError::NoProvider(resource_type.to_string()))?;
        if resource_type == BRIDGE_RESOURCE_TYPE {
            self.check_bridge_permission(logical_id, &properties, resources)?;
        }
        let request = match previous {
            Some(p) => self.request(
                deployment,
                RequestType::Update,
                logical_id,
                resource_type,
                Some(p.physical_id.clone()),
                properties.clone(),
                Some(p.properties.clone()),
            ),
            None => self.request(deployment, RequestType::Create, logical_id, resource_type, None, properties.clone(), None),
        };
        let response = provider.handle(&request).await;
        if !response.is_success() {
            return Err(EngineError::ResourceFailed {
                stack: deployment.stack_name.clone(),
                resource: logical_id.to_string(),
                reason: response.reason.unwrap_or_else(|| "custom resource reported failure".to_string()),
            });
        }
        let saved = &deployment.template.resources[logical_id];
        Ok(ProvisionedResource {
            logical_id: logical_id.to_string(),
            ty: resource_type.to_string(),
            region: deployment.region.clone(),
            physical_id: response.physical_resource_id,
            attributes: response.data.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
            properties,
            deletion_policy: saved.deletion_policy,
            update_replace_policy: saved.update_replace_policy,
        })
    }

    // cleanup failures are logged, the stack itself has already succeeded
    async fn delete_custom_resource(&self, deployment: &StackDeployment, resource: &ProvisionedResource) {
        let Some(provider) = self.providers.get(&resource.ty) else {
            tracing::warn!(resource = %resource.logical_id, ty = %resource.ty, "no provider to delete with");
            return;
        };
        let request = self.request(
            deployment,
            RequestType::Delete,
            &resource.logical_id,
            &resource.ty,
            Some(resource.physical_id.clone()),
            resource.properties.clone(),
            None,
        );
        let response = provider.handle(&request).await;
        if response.is_success() {
            tracing::info!(resource = %resource.logical_id, physical_id = %resource.physical_id, "deleted");
        } else {
            tracing::warn!(resource = %resource.logical_id, reason = ?response.reason, "delete failed");
        }
    }

    /// The bridge's function must run as a role whose policy grants
    /// `ssm:GetParameter` on the parameter it is asked to read.
    fn check_bridge_permission(
        &self,
        logical_id: &str,
        properties: &Value,
        resources: &BTreeMap<String, ProvisionedResource>,
    ) -> Result<(), EngineError> {
        let props = parse_properties(properties).map_err(|e| EngineError::InvalidProperty(format!("{logical_id}: {e}")))?;
        let service_token = props.service_token.unwrap_or_default();
        let function = resources.values()
            .find(|r| r.ty == "AWS::Lambda::Function" && r.attributes.get("Arn").and_then(Value::as_str) == Some(service_token.as_str()))
            .ok_or_else(|| EngineError::InvalidProperty(format!("{logical_id}: ServiceToken {service_token} is not a function in this stack")))?;
        let role_arn = function.properties.get("Role").and_then(Value::as_str).unwrap_or_default();
        let role = resources.values()
            .find(|r| r.ty == "AWS::IAM::Role" && r.attributes.get("Arn").and_then(Value::as_str) == Some(role_arn));
        let path = ParameterPath::new(&props.parameter_name).map_err(|e| EngineError::InvalidProperty(format!("{logical_id}: {e}")))?;
        let parameter_arn = path.arn(&props.parameter_region, &self.account);
        let action = "ssm:GetParameter";
        let allowed = role
            .and_then(|r| r.properties.get("Policies"))
            .and_then(Value::as_array)
            .map(|policies| {
                policies.iter()
                    .filter_map(|p| p.get("PolicyDocument"))
                    .any(|doc| document_allows(doc, action, &parameter_arn))
            })
            .unwrap_or(false);
        if !allowed {
            return Err(EngineError::PermissionDenied {
                role: role_arn.to_string(),
                action: action.to_string(),
                resource: parameter_arn,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeploymentEngine for LocalEngine {
    async fn apply(&self, deployment: &StackDeployment) -> crate::error::Result<BTreeMap<String, String>> {
        Ok(self.apply_stack(deployment).await?)
    }

    async fn outputs(&self, stack_name: &str, region: &str) -> crate::error::Result<Option<BTreeMap<String, String>>> {
        Ok(self.stack_outputs(region, stack_name).await)
    }
}

/// Record describing a simulated deployment, for `simulate` to print.
pub fn summary(state: &EngineState) -> Value {
    json!({
        "stacks": state.stacks.values().map(|s| json!({
            "name": s.name,
            "region": s.region,
            "outputs": s.outputs,
        })).collect::<Vec<_>>(),
        "parameters": state.parameters,
        "dns": state.dns,
        "retained": state.retained.iter().map(|r| &r.physical_id).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_cfn_stack::{get_att, get_ref, Resource, StackInput, TemplateParameter};
    use crate::resources::StringParameter;

    const ACCOUNT: &str = "123456789012";

    fn parameter_stack(value: &str) -> StackDeployment {
        let mut stack = StackInput::new("ParamStack");
        stack.add_parameter("Value", TemplateParameter::string("value"));
        stack.add(Resource::new("Param", StringParameter {
            name: ParameterPath::new("/test/value").unwrap(),
            value: get_ref("Value"),
            description: None,
        }));
        stack.add_output("Written", "value written", get_att("Param", "Value"));
        StackDeployment::new("ParamStack", "us-east-1", stack.to_template().unwrap()).with_parameter("Value", value)
    }

    #[tokio::test]
    async fn writes_parameters_in_stack_region() {
        let engine = LocalEngine::new(ACCOUNT);
        let outputs = engine.apply_stack(&parameter_stack("one")).await.unwrap();
        assert_eq!(outputs["Written"], "one");
        let path = ParameterPath::new("/test/value").unwrap();
        assert_eq!(engine.parameter("us-east-1", &path).as_deref(), Some("one"));
        assert_eq!(engine.parameter("eu-west-2", &path), None);
    }

    #[tokio::test]
    async fn missing_parameter_values_are_rejected() {
        let engine = LocalEngine::new(ACCOUNT);
        let mut deployment = parameter_stack("one");
        deployment.parameters.clear();
        assert!(matches!(engine.apply_stack(&deployment).await, Err(EngineError::MissingParameter { .. })));
    }

    #[tokio::test]
    async fn failed_apply_restores_everything() {
        let engine = LocalEngine::new(ACCOUNT);
        engine.apply_stack(&parameter_stack("one")).await.unwrap();
        let before = engine.state().await;

        // Bucket refuses such names itself, so the bad resource goes in by hand
        let mut deployment = parameter_stack("two");
        deployment.template.resources.insert("Bucket".into(), aws_cfn_stack::SavedResource {
            ty: "AWS::S3::Bucket".into(),
            properties: json!({ "BucketName": "Not_Valid" }),
            depends_on: vec!["Param".into()],
            deletion_policy: None,
            update_replace_policy: None,
        });
        let err = engine.apply_stack(&deployment).await.unwrap_err();
        assert!(matches!(err, EngineError::ResourceFailed { ref resource, .. } if resource == "Bucket"));
        assert_eq!(engine.state().await, before);
        let path = ParameterPath::new("/test/value").unwrap();
        assert_eq!(engine.parameter("us-east-1", &path).as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn unchanged_resources_are_not_reapplied() {
        let engine = LocalEngine::new(ACCOUNT);
        engine.apply_stack(&parameter_stack("one")).await.unwrap();
        let sequence = engine.state().await.sequence;
        engine.apply_stack(&parameter_stack("one")).await.unwrap();
        assert_eq!(engine.state().await.sequence, sequence);
    }

    #[tokio::test]
    async fn state_file_survives_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let engine = LocalEngine::with_state_file(ACCOUNT, path.clone()).unwrap();
            engine.apply_stack(&parameter_stack("persisted")).await.unwrap();
        }
        let engine = LocalEngine::with_state_file(ACCOUNT, path).unwrap();
        let param = ParameterPath::new("/test/value").unwrap();
        assert_eq!(engine.parameter("us-east-1", &param).as_deref(), Some("persisted"));
        assert!(engine.stack("us-east-1", "ParamStack").await.is_some());
    }
}
