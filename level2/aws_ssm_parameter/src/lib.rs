use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ssm::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_ssm::operation::get_parameter::GetParameterError;
use aws_sdk_ssm::types::ParameterType;
use serde::{Deserialize, Serialize};

/// Where the edge function stack publishes its current version ARN.
pub const LAMBDA_EDGE_VERSION_PARAMETER: &str = "/blog/lambdaEdgeLambdaVersion";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Invalid parameter name {name:?}\n{reason}")]
    InvalidName { name: String, reason: String },

    #[error("Access denied to parameter {name} in {region}: {message}")]
    AccessDenied { name: String, region: String, message: String },

    #[error("SSM call for {name} in {region} failed: {message}")]
    Service { name: String, region: String, message: String },
}

/// A fully qualified, hierarchical SSM parameter name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParameterPath(String);

impl ParameterPath {
    pub fn new(name: &str) -> Result<Self, ParameterError> {
        let invalid = |reason: &str| ParameterError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if !name.starts_with('/') || name.len() < 2 {
            return Err(invalid("Must start with '/' followed by at least one character"));
        }
        if name.len() > 1011 {
            return Err(invalid("Must be at most 1011 characters"));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')) {
            return Err(invalid("Must contain only [A-Za-z0-9_.-/]"));
        }
        if name.contains("//") || name.ends_with('/') {
            return Err(invalid("Path segments must not be empty"));
        }
        let lower = name[1..].to_ascii_lowercase();
        if lower.starts_with("aws") || lower.starts_with("ssm") {
            return Err(invalid("Names beginning with aws or ssm are reserved"));
        }
        if name.matches('/').count() > 15 {
            return Err(invalid("Must have at most 15 levels"));
        }
        Ok(Self(name.to_string()))
    }

    /// The path of [`LAMBDA_EDGE_VERSION_PARAMETER`].
    pub fn lambda_edge_version() -> Self {
        Self(LAMBDA_EDGE_VERSION_PARAMETER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `arn:aws:ssm:<region>:<account>:parameter/<path>`. The leading slash
    /// of the path doubles as the separator.
    pub fn arn(&self, region: &str, account: &str) -> String {
        format!("arn:aws:ssm:{region}:{account}:parameter{}", self.0)
    }
}

impl fmt::Display for ParameterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ParameterPath {
    type Error = ParameterError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        ParameterPath::new(&value)
    }
}

impl From<ParameterPath> for String {
    fn from(value: ParameterPath) -> Self {
        value.0
    }
}

#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Ok(None) when the parameter has never been written.
    async fn get_parameter(&self, region: &str, path: &ParameterPath) -> Result<Option<String>, ParameterError>;

    async fn put_parameter(&self, region: &str, path: &ParameterPath, value: &str) -> Result<(), ParameterError>;
}

#[async_trait]
impl<T: ParameterStore + ?Sized> ParameterStore for Arc<T> {
    async fn get_parameter(&self, region: &str, path: &ParameterPath) -> Result<Option<String>, ParameterError> {
        (**self).get_parameter(region, path).await
    }

    async fn put_parameter(&self, region: &str, path: &ParameterPath, value: &str) -> Result<(), ParameterError> {
        (**self).put_parameter(region, path, value).await
    }
}

/// Talks to SSM, building one client per region on first use.
#[derive(Default)]
pub struct SsmParameterStore {
    clients: tokio::sync::Mutex<HashMap<String, aws_sdk_ssm::Client>>,
}

impl SsmParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, region: &str) -> aws_sdk_ssm::Client {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(region) {
            return client.clone();
        }
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        let client = aws_sdk_ssm::Client::new(&shared_config);
        clients.insert(region.to_string(), client.clone());
        client
    }
}

#[async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get_parameter(&self, region: &str, path: &ParameterPath) -> Result<Option<String>, ParameterError> {
        let client = self.client(region).await;
        tracing::debug!(parameter = %path, region, "reading parameter");
        match client.get_parameter().name(path.as_str()).send().await {
            Ok(resp) => Ok(resp.parameter().and_then(|p| p.value()).map(|v| v.to_string())),
            Err(e) => {
                let service_err = e.as_service_error();
                if let Some(GetParameterError::ParameterNotFound(_)) = service_err {
                    return Ok(None);
                }
                let message = DisplayErrorContext(&e).to_string();
                if service_err.and_then(|se| se.code()) == Some("AccessDeniedException") {
                    return Err(ParameterError::AccessDenied {
                        name: path.to_string(),
                        region: region.to_string(),
                        message,
                    });
                }
                Err(ParameterError::Service { name: path.to_string(), region: region.to_string(), message })
            }
        }
    }

    async fn put_parameter(&self, region: &str, path: &ParameterPath, value: &str) -> Result<(), ParameterError> {
        let client = self.client(region).await;
        client.put_parameter()
            .name(path.as_str())
            .value(value)
            .r#type(ParameterType::String)
            .overwrite(true)
            .send()
            .await
            .map_err(|e| ParameterError::Service {
                name: path.to_string(),
                region: region.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        tracing::info!(parameter = %path, region, "parameter written");
        Ok(())
    }
}

/// Region -> parameter name -> value.
pub type ParameterSnapshot = BTreeMap<String, BTreeMap<String, String>>;

/// Process-local store with the same region scoping as SSM.
#[derive(Default, Debug)]
pub struct InMemoryParameterStore {
    values: Mutex<ParameterSnapshot>,
}

impl InMemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: ParameterSnapshot) -> Self {
        Self { values: Mutex::new(snapshot) }
    }

    pub fn snapshot(&self) -> ParameterSnapshot {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn restore(&self, snapshot: ParameterSnapshot) {
        *self.values.lock().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    pub fn get(&self, region: &str, path: &ParameterPath) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(region).and_then(|r| r.get(path.as_str())).cloned()
    }

    pub fn set(&self, region: &str, path: &ParameterPath, value: &str) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.entry(region.to_string())
            .or_default()
            .insert(path.as_str().to_string(), value.to_string());
    }

    pub fn remove(&self, region: &str, path: &ParameterPath) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(r) = values.get_mut(region) {
            r.remove(path.as_str());
        }
    }
}

#[async_trait]
impl ParameterStore for InMemoryParameterStore {
    async fn get_parameter(&self, region: &str, path: &ParameterPath) -> Result<Option<String>, ParameterError> {
        Ok(self.get(region, path))
    }

    async fn put_parameter(&self, region: &str, path: &ParameterPath, value: &str) -> Result<(), ParameterError> {
        self.set(region, path, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_paths() {
        assert_eq!(ParameterPath::new(LAMBDA_EDGE_VERSION_PARAMETER).unwrap(), ParameterPath::lambda_edge_version());
        assert!(ParameterPath::new("blog/version").is_err());
        assert!(ParameterPath::new("/").is_err());
        assert!(ParameterPath::new("/blog//version").is_err());
        assert!(ParameterPath::new("/blog/ver sion").is_err());
        assert!(ParameterPath::new("/aws/reserved").is_err());
        assert!(ParameterPath::new(&format!("/{}", "a".repeat(1011))).is_err());
    }

    #[test]
    fn arn_uses_path_as_separator() {
        let p = ParameterPath::new(LAMBDA_EDGE_VERSION_PARAMETER).unwrap();
        assert_eq!(
            p.arn("us-east-1", "123456789012"),
            "arn:aws:ssm:us-east-1:123456789012:parameter/blog/lambdaEdgeLambdaVersion"
        );
    }

    #[tokio::test]
    async fn in_memory_store_is_region_scoped() {
        let store = InMemoryParameterStore::new();
        let p = ParameterPath::new("/blog/x").unwrap();
        store.put_parameter("us-east-1", &p, "v1").await.unwrap();
        assert_eq!(store.get_parameter("us-east-1", &p).await.unwrap(), Some("v1".to_string()));
        assert_eq!(store.get_parameter("eu-west-2", &p).await.unwrap(), None);
    }

    #[test]
    fn snapshot_restore_rolls_back_writes() {
        let store = InMemoryParameterStore::new();
        let p = ParameterPath::new("/blog/x").unwrap();
        store.set("us-east-1", &p, "v1");
        let snap = store.snapshot();
        store.set("us-east-1", &p, "v2");
        store.restore(snap);
        assert_eq!(store.get("us-east-1", &p), Some("v1".to_string()));
    }
}
