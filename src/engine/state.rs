use std::collections::BTreeMap;
use std::path::Path;

use aws_cfn_stack::{DeletionPolicy, SavedTemplate};
use aws_ssm_parameter::ParameterSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EngineError;

/// Everything the simulated account holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    /// keyed by `{region}/{stack name}`.
    #[serde(default)]
    pub stacks: BTreeMap<String, StackRecord>,
    #[serde(default)]
    pub parameters: ParameterSnapshot,
    /// record name -> alias target.
    #[serde(default)]
    pub dns: BTreeMap<String, String>,
    /// unqualified function ARN -> last published version number.
    #[serde(default)]
    pub version_counters: BTreeMap<String, u64>,
    /// resources dropped from a template but kept because of their policy.
    #[serde(default)]
    pub retained: Vec<ProvisionedResource>,
    #[serde(default)]
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackRecord {
    pub name: String,
    pub region: String,
    pub template: SavedTemplate,
    pub parameters: BTreeMap<String, String>,
    pub resources: BTreeMap<String, ProvisionedResource>,
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    pub logical_id: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub region: String,
    pub physical_id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// properties with every intrinsic resolved, as last applied.
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,
}

pub fn stack_key(region: &str, stack_name: &str) -> String {
    format!("{region}/{stack_name}")
}

impl EngineState {
    /// A missing file is an empty account.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|e| EngineError::Io(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&data).map_err(|e| EngineError::Json(format!("{}: {e}", path.display())))
    }

    /// Written to a sibling file first so a crash never leaves half a state.
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let data = serde_json::to_string_pretty(self).map_err(|e| EngineError::Json(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::Io(format!("{}: {e}", parent.display())))?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data).map_err(|e| EngineError::Io(format!("{}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, path).map_err(|e| EngineError::Io(format!("{}: {e}", path.display())))?;
        Ok(())
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Every version ARN that exists anywhere in the account.
    pub fn published_versions(&self) -> impl Iterator<Item = &str> {
        self.stacks.values()
            .flat_map(|s| s.resources.values())
            .chain(self.retained.iter())
            .filter(|r| r.ty == "AWS::Lambda::Version")
            .map(|r| r.physical_id.as_str())
    }
}
