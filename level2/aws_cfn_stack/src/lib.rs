use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

mod client;
pub use client::*;

pub const AWS_REGION: &str = "AWS::Region";
pub const AWS_ACCOUNT_ID: &str = "AWS::AccountId";
pub const AWS_PARTITION: &str = "AWS::Partition";
pub const AWS_STACK_NAME: &str = "AWS::StackName";
pub const AWS_URL_SUFFIX: &str = "AWS::URLSuffix";

pub type Result<T> = std::result::Result<T, StackError>;

#[derive(thiserror::Error, Debug)]
pub enum StackError {
    #[error("Validation failed on resource '{name}'\n{reason}")]
    InvalidResource { name: String, reason: String },

    #[error("Resource '{0}' is declared more than once")]
    DuplicateResource(String),

    #[error("Resource '{resource}' depends on '{dependency}' which is not part of the stack")]
    UnknownDependency { resource: String, dependency: String },

    #[error("Invalid stack name {name}\n{reason}")]
    InvalidStackName { name: String, reason: String },

    #[error("{0}")]
    InvalidLogicalId(String),

    #[error("Failed to serialize template: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("CloudFormation call for stack {stack} failed: {message}")]
    Aws { stack: String, message: String },

    #[error("Stack {stack} ended in {status}: {reason}")]
    Failed { stack: String, status: String, reason: String },

    #[error("Stack {0} not found")]
    NotFound(String),
}

/// A typed CloudFormation resource. Implementors are plain structs
/// describing one resource's properties; they get validated before they
/// are allowed into a template.
pub trait CfnResource: Send + Sync {
    fn type_string(&self) -> &'static str;

    fn properties(&self) -> Value;

    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// applied as both DeletionPolicy and UpdateReplacePolicy.
    fn deletion_policy(&self) -> Option<DeletionPolicy> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    Snapshot,
}

pub struct Resource {
    pub name: String,
    pub properties: Box<dyn CfnResource>,
    /// explicit construction-time prerequisites, on top of whatever
    /// Ref/GetAtt already implies.
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new<S: Into<String>, R: CfnResource + 'static>(name: S, properties: R) -> Self {
        Self {
            name: name.into(),
            properties: Box::new(properties),
            depends_on: vec![],
        }
    }

    pub fn depending_on<S: Into<String>>(mut self, dependency: S) -> Self {
        self.depends_on.push(dependency.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedResource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(rename = "UpdateReplacePolicy", default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateParameter {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Default", default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl TemplateParameter {
    pub fn string(description: &str) -> Self {
        Self {
            ty: "String".to_string(),
            description: Some(description.to_string()),
            default: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOutput {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTemplate {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Parameters", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, TemplateParameter>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, SavedResource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, ResourceOutput>,
}

impl Default for SavedTemplate {
    fn default() -> Self {
        Self {
            version: "2010-09-09".to_string(),
            description: None,
            parameters: Default::default(),
            resources: Default::default(),
            outputs: Default::default(),
        }
    }
}

impl SavedTemplate {
    /// we make it pretty so if a user needs to look at the stack in the
    /// Cfn console, it looks nice
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Everything needed to produce one stack's template.
#[derive(Default)]
pub struct StackInput {
    pub stack_name: String,
    pub description: Option<String>,
    pub parameters: Vec<(String, TemplateParameter)>,
    pub resources: Vec<Resource>,
    pub outputs: Vec<(String, ResourceOutput)>,
}

impl StackInput {
    pub fn new(stack_name: &str) -> Self {
        Self {
            stack_name: stack_name.to_string(),
            ..Default::default()
        }
    }

    pub fn add(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn add_parameter(&mut self, name: &str, parameter: TemplateParameter) {
        self.parameters.push((name.to_string(), parameter));
    }

    pub fn add_output(&mut self, name: &str, description: &str, value: Value) {
        self.outputs.push((name.to_string(), ResourceOutput {
            description: description.to_string(),
            value,
        }));
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.resources.iter().any(|r| r.name == name)
    }

    pub fn to_template(&self) -> Result<SavedTemplate> {
        validate_stack_name(&self.stack_name)?;
        let mut out_template = SavedTemplate {
            description: self.description.clone(),
            ..Default::default()
        };
        let declared: BTreeSet<&str> = self.resources.iter().map(|r| r.name.as_str()).collect();
        for resource in self.resources.iter() {
            if let Some(e) = verify_logical_id(&resource.name) {
                return Err(StackError::InvalidLogicalId(e));
            }
            if let Err(reason) = resource.properties.validate() {
                return Err(StackError::InvalidResource { name: resource.name.clone(), reason });
            }
            for dependency in resource.depends_on.iter() {
                if !declared.contains(dependency.as_str()) {
                    return Err(StackError::UnknownDependency {
                        resource: resource.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
            let policy = resource.properties.deletion_policy();
            let saved_resource = SavedResource {
                ty: resource.properties.type_string().to_string(),
                properties: resource.properties.properties(),
                depends_on: resource.depends_on.clone(),
                deletion_policy: policy,
                update_replace_policy: policy,
            };
            if out_template.resources.insert(resource.name.clone(), saved_resource).is_some() {
                return Err(StackError::DuplicateResource(resource.name.clone()));
            }
        }
        for (name, parameter) in self.parameters.iter() {
            if let Some(e) = verify_logical_id(name) {
                return Err(StackError::InvalidLogicalId(e));
            }
            out_template.parameters.insert(name.clone(), parameter.clone());
        }
        for (name, output) in self.outputs.iter() {
            if let Some(e) = verify_logical_id(name) {
                return Err(StackError::InvalidLogicalId(e));
            }
            out_template.outputs.insert(name.clone(), output.clone());
        }
        Ok(out_template)
    }
}

pub fn get_ref(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn sub(s: &str) -> Value {
    json!({ "Fn::Sub": s })
}

pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

// A stack name can contain only alphanumeric characters (case sensitive) and hyphens.
// It must start with an alphabetical character and can't be longer than 128 characters.
pub fn validate_stack_name(stack_name: &str) -> Result<String> {
    let restriction = "Must only consist of alphanumeric characters and hyphens, Must start with an alphabetical character, and cannot be longer than 128 characters.";
    let invalid = || StackError::InvalidStackName {
        name: stack_name.to_string(),
        reason: restriction.to_string(),
    };
    if stack_name.is_empty() || stack_name.len() > 128 {
        return Err(invalid());
    }
    for (i, c) in stack_name.chars().enumerate() {
        if i == 0 && !c.is_ascii_alphabetic() {
            return Err(invalid());
        }
        if !c.is_ascii_alphanumeric() && c != '-' {
            return Err(invalid());
        }
    }
    Ok(stack_name.to_string())
}

pub fn verify_logical_id(resource_name: &str) -> Option<String> {
    if resource_name.len() > 255 {
        return Some(format!("Invalid resource name {:?}\nmust be less than 255 characters", resource_name));
    }
    if resource_name.is_empty() {
        return Some(format!("Invalid resource name {:?}\nMust contain at least 1 character", resource_name));
    }
    if !resource_name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(format!("Invalid resource name {:?}\nMust contain only alphanumeric characters [A-Za-z0-9]", resource_name));
    }
    None
}
