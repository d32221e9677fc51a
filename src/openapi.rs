//! Renders the API's OpenAPI template and turns it into a RestApi `Body`.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use thiserror::Error;

/// Placeholder for the API Gateway invocation URI of the hello world function.
pub const HELLO_WORLD_VARIABLE: &str = "helloworld-lambda";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpenApiError {
    #[error("template variable {0:?} has no value")]
    Unresolved(String),

    #[error("unterminated template tag starting at byte {0}")]
    Unterminated(usize),

    #[error("rendered document is not valid YAML: {0}")]
    Yaml(String),
}

/// Replaces every `{{name}}` with its value. Whitespace inside the braces is
/// ignored. A tag with no matching variable is an error.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> Result<String, OpenApiError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or(OpenApiError::Unterminated(offset + start))?;
        let name = after[..end].trim();
        let value = vars.get(name).ok_or_else(|| OpenApiError::Unresolved(name.to_string()))?;
        out.push_str(value);
        let consumed = start + 2 + end + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Parses rendered YAML into the JSON `Body` of an `AWS::ApiGateway::RestApi`.
/// Strings holding `${...}` become `Fn::Sub` so CloudFormation fills them in.
pub fn to_api_body(rendered: &str) -> Result<Value, OpenApiError> {
    let doc: serde_yaml::Value = serde_yaml::from_str(rendered).map_err(|e| OpenApiError::Yaml(e.to_string()))?;
    Ok(wrap_substitutions(yaml_to_json(doc)))
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(&other).unwrap_or_default().trim().to_string(),
    }
}

// response codes are usually unquoted, so keys can't go through serde_json directly
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!(i)
            } else if let Some(u) = n.as_u64() {
                json!(u)
            } else {
                n.as_f64().map(|f| json!(f)).unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(seq) => Value::Array(seq.into_iter().map(yaml_to_json).collect()),
        serde_yaml::Value::Mapping(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(yaml_key(k), yaml_to_json(v));
            }
            Value::Object(out)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn wrap_substitutions(value: Value) -> Value {
    match value {
        Value::String(s) if s.contains("${") => json!({ "Fn::Sub": s }),
        Value::Array(items) => Value::Array(items.into_iter().map(wrap_substitutions).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, wrap_substitutions(v))).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_API_TEMPLATE;

    fn vars(uri: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(HELLO_WORLD_VARIABLE.to_string(), uri.to_string())])
    }

    #[test]
    fn replaces_variables() {
        let out = render("uri: \"{{ helloworld-lambda }}\"\nother: {{helloworld-lambda}}", &vars("X")).unwrap();
        assert_eq!(out, "uri: \"X\"\nother: X");
    }

    #[test]
    fn unresolved_and_unterminated_tags_fail() {
        assert_eq!(
            render("a: {{nope}}", &vars("X")),
            Err(OpenApiError::Unresolved("nope".to_string()))
        );
        assert_eq!(render("abc {{helloworld-lambda", &vars("X")), Err(OpenApiError::Unterminated(4)));
    }

    #[test]
    fn default_template_becomes_body_with_substitution() {
        let uri = "arn:aws:apigateway:${AWS::Region}:lambda:path/2015-03-31/functions/${HelloWorldLambda.Arn}/invocations";
        let rendered = render(DEFAULT_API_TEMPLATE, &vars(uri)).unwrap();
        let body = to_api_body(&rendered).unwrap();
        let integration = &body["paths"]["/hello"]["get"]["x-amazon-apigateway-integration"];
        assert_eq!(integration["type"], "aws_proxy");
        assert_eq!(integration["uri"], json!({ "Fn::Sub": uri }));
        assert_eq!(body["info"]["title"], "HelloWorld");
    }

    #[test]
    fn numeric_keys_are_stringified() {
        let body = to_api_body("responses:\n  200:\n    description: ok\n").unwrap();
        assert_eq!(body["responses"]["200"]["description"], "ok");
    }

    #[test]
    fn invalid_yaml_is_reported() {
        assert!(matches!(to_api_body("a: [unclosed"), Err(OpenApiError::Yaml(_))));
    }
}
