use std::collections::BTreeMap;

use aws_cfn_stack::{AWS_ACCOUNT_ID, AWS_PARTITION, AWS_REGION, AWS_STACK_NAME, AWS_URL_SUFFIX};
use serde_json::{Map, Value};

use super::graph::{sub_parts, Placeholder};
use super::state::ProvisionedResource;
use super::EngineError;

/// What intrinsics resolve against while one stack is being applied.
pub struct Context<'a> {
    pub account: &'a str,
    pub region: &'a str,
    pub stack_name: &'a str,
    pub parameters: &'a BTreeMap<String, String>,
    pub resources: &'a BTreeMap<String, ProvisionedResource>,
    /// logical id of the resource being resolved, for error messages.
    pub current: &'a str,
}

impl Context<'_> {
    pub fn resolve(&self, value: &Value) -> Result<Value, EngineError> {
        match value {
            Value::Array(items) => items.iter().map(|v| self.resolve(v)).collect::<Result<Vec<_>, _>>().map(Value::Array),
            Value::Object(map) if map.len() == 1 => {
                let Some((key, inner)) = map.iter().next() else { return Ok(Value::Object(Map::new())) };
                match key.as_str() {
                    "Ref" => self.resolve_ref(inner),
                    "Fn::GetAtt" => self.resolve_get_att(inner),
                    "Fn::Sub" => self.resolve_sub(inner),
                    "Fn::Join" => self.resolve_join(inner),
                    k if k.starts_with("Fn::") => Err(EngineError::Unsupported(format!("{k} in {}", self.current))),
                    _ => self.resolve_object(map),
                }
            }
            Value::Object(map) => self.resolve_object(map),
            other => Ok(other.clone()),
        }
    }

    fn resolve_object(&self, map: &Map<String, Value>) -> Result<Value, EngineError> {
        let mut out = Map::new();
        for (k, v) in map {
            out.insert(k.clone(), self.resolve(v)?);
        }
        Ok(Value::Object(out))
    }

    fn unknown(&self, reference: &str) -> EngineError {
        EngineError::UnknownReference { resource: self.current.to_string(), reference: reference.to_string() }
    }

    pub fn lookup_ref(&self, name: &str) -> Result<Value, EngineError> {
        let pseudo = match name {
            AWS_REGION => Some(self.region.to_string()),
            AWS_ACCOUNT_ID => Some(self.account.to_string()),
            AWS_PARTITION => Some("aws".to_string()),
            AWS_STACK_NAME => Some(self.stack_name.to_string()),
            AWS_URL_SUFFIX => Some("amazonaws.com".to_string()),
            _ => None,
        };
        if let Some(v) = pseudo.or_else(|| self.parameters.get(name).cloned()) {
            return Ok(Value::String(v));
        }
        match self.resources.get(name) {
            Some(r) => Ok(Value::String(r.physical_id.clone())),
            None => Err(self.unknown(name)),
        }
    }

    pub fn lookup_att(&self, id: &str, attribute: &str) -> Result<Value, EngineError> {
        let resource = self.resources.get(id).ok_or_else(|| self.unknown(id))?;
        resource.attributes.get(attribute).cloned().ok_or_else(|| EngineError::UnknownAttribute {
            resource: id.to_string(),
            attribute: attribute.to_string(),
        })
    }

    fn resolve_ref(&self, inner: &Value) -> Result<Value, EngineError> {
        match inner {
            Value::String(name) => self.lookup_ref(name),
            other => Err(EngineError::InvalidProperty(format!("Ref in {} must name a string, got {other}", self.current))),
        }
    }

    fn resolve_get_att(&self, inner: &Value) -> Result<Value, EngineError> {
        match inner {
            Value::Array(parts) if parts.len() == 2 => {
                let id = self.resolve_string(&parts[0])?;
                let attribute = self.resolve_string(&parts[1])?;
                self.lookup_att(&id, &attribute)
            }
            Value::String(dotted) => match dotted.split_once('.') {
                Some((id, attribute)) => self.lookup_att(id, attribute),
                None => Err(EngineError::InvalidProperty(format!("Fn::GetAtt {dotted:?} in {} has no attribute", self.current))),
            },
            other => Err(EngineError::InvalidProperty(format!("malformed Fn::GetAtt in {}: {other}", self.current))),
        }
    }

    fn resolve_sub(&self, inner: &Value) -> Result<Value, EngineError> {
        let (template, vars) = match inner {
            Value::String(s) => (s.as_str(), BTreeMap::new()),
            Value::Array(parts) => {
                let Some(Value::String(s)) = parts.first() else {
                    return Err(EngineError::InvalidProperty(format!("malformed Fn::Sub in {}", self.current)));
                };
                let mut vars = BTreeMap::new();
                if let Some(Value::Object(map)) = parts.get(1) {
                    for (name, v) in map {
                        vars.insert(name.as_str(), self.resolve_string(v)?);
                    }
                }
                (s.as_str(), vars)
            }
            other => return Err(EngineError::InvalidProperty(format!("malformed Fn::Sub in {}: {other}", self.current))),
        };
        let mut out = String::new();
        for part in sub_parts(template)? {
            match part {
                Placeholder::Literal(text) => out.push_str(text),
                Placeholder::Escaped(name) => {
                    out.push_str("${");
                    out.push_str(name);
                    out.push('}');
                }
                Placeholder::Variable(name) => {
                    let value = match vars.get(name) {
                        Some(v) => v.clone(),
                        None => match name.split_once('.') {
                            Some((id, attribute)) if !name.starts_with("AWS::") => stringify(&self.lookup_att(id, attribute)?, self.current)?,
                            _ => stringify(&self.lookup_ref(name)?, self.current)?,
                        },
                    };
                    out.push_str(&value);
                }
            }
        }
        Ok(Value::String(out))
    }

    fn resolve_join(&self, inner: &Value) -> Result<Value, EngineError> {
        let Value::Array(parts) = inner else {
            return Err(EngineError::InvalidProperty(format!("malformed Fn::Join in {}", self.current)));
        };
        let (Some(delimiter), Some(items)) = (parts.first(), parts.get(1)) else {
            return Err(EngineError::InvalidProperty(format!("malformed Fn::Join in {}", self.current)));
        };
        let delimiter = self.resolve_string(delimiter)?;
        let items = match self.resolve(items)? {
            Value::Array(items) => items,
            other => return Err(EngineError::InvalidProperty(format!("Fn::Join in {} needs a list, got {other}", self.current))),
        };
        let strings = items.iter().map(|v| stringify(v, self.current)).collect::<Result<Vec<_>, _>>()?;
        Ok(Value::String(strings.join(&delimiter)))
    }

    fn resolve_string(&self, value: &Value) -> Result<String, EngineError> {
        stringify(&self.resolve(value)?, self.current)
    }
}

pub fn stringify(value: &Value, resource: &str) -> Result<String, EngineError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(EngineError::InvalidProperty(format!("{resource}: expected a string, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(id: &str, physical_id: &str, attributes: Value) -> (String, ProvisionedResource) {
        let attributes = attributes.as_object().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        (id.to_string(), ProvisionedResource {
            logical_id: id.to_string(),
            ty: "AWS::Test::Thing".into(),
            region: "eu-west-2".into(),
            physical_id: physical_id.to_string(),
            attributes,
            properties: json!({}),
            deletion_policy: None,
            update_replace_policy: None,
        })
    }

    fn with_context(f: impl FnOnce(&Context)) {
        let parameters = BTreeMap::from([("AssetBucket".to_string(), "assets".to_string())]);
        let resources = BTreeMap::from([
            resource("Bucket", "website-1", json!({ "Arn": "arn:aws:s3:::website-1" })),
            resource("Bridge", "2024-01-01T00:00:00Z", json!({ "Parameter.Value": "arn:aws:lambda:us-east-1:1:function:f:3" })),
        ]);
        let ctx = Context {
            account: "123456789012",
            region: "eu-west-2",
            stack_name: "WebBackendStack",
            parameters: &parameters,
            resources: &resources,
            current: "Test",
        };
        f(&ctx)
    }

    #[test]
    fn refs_and_attributes() {
        with_context(|ctx| {
            assert_eq!(ctx.resolve(&json!({ "Ref": "AssetBucket" })).unwrap(), "assets");
            assert_eq!(ctx.resolve(&json!({ "Ref": "AWS::Region" })).unwrap(), "eu-west-2");
            assert_eq!(ctx.resolve(&json!({ "Ref": "Bucket" })).unwrap(), "website-1");
            assert_eq!(
                ctx.resolve(&json!({ "Fn::GetAtt": ["Bridge", "Parameter.Value"] })).unwrap(),
                "arn:aws:lambda:us-east-1:1:function:f:3"
            );
            assert_eq!(
                ctx.resolve(&json!({ "Fn::GetAtt": "Bridge.Parameter.Value" })).unwrap(),
                "arn:aws:lambda:us-east-1:1:function:f:3"
            );
            assert!(matches!(ctx.resolve(&json!({ "Ref": "Nope" })), Err(EngineError::UnknownReference { .. })));
            assert!(matches!(
                ctx.resolve(&json!({ "Fn::GetAtt": ["Bucket", "Nope"] })),
                Err(EngineError::UnknownAttribute { .. })
            ));
        });
    }

    #[test]
    fn sub_forms() {
        with_context(|ctx| {
            assert_eq!(
                ctx.resolve(&json!({ "Fn::Sub": "${Bucket.Arn}/* ${AWS::AccountId} ${!Keep}" })).unwrap(),
                "arn:aws:s3:::website-1/* 123456789012 ${Keep}"
            );
            assert_eq!(
                ctx.resolve(&json!({ "Fn::Sub": ["id/${Oai}", { "Oai": { "Ref": "Bucket" } }] })).unwrap(),
                "id/website-1"
            );
        });
    }

    #[test]
    fn join_and_nesting() {
        with_context(|ctx| {
            let value = json!({
                "Nested": [{ "Fn::Join": ["-", ["a", { "Ref": "AssetBucket" }, 3]] }],
                "Plain": true,
            });
            assert_eq!(ctx.resolve(&value).unwrap(), json!({ "Nested": ["a-assets-3"], "Plain": true }));
        });
    }

    #[test]
    fn unsupported_intrinsics_fail() {
        with_context(|ctx| {
            assert!(matches!(ctx.resolve(&json!({ "Fn::ImportValue": "x" })), Err(EngineError::Unsupported(_))));
        });
    }
}
