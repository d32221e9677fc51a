use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// One IAM policy statement. Resources stay as JSON so they can hold
/// intrinsics until CloudFormation (or the local engine) resolves them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Value>,
    #[serde(rename = "Action", deserialize_with = "one_or_many")]
    pub actions: Vec<String>,
    #[serde(rename = "Resource", default, deserialize_with = "one_or_many_values", skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Value>,
}

impl PolicyStatement {
    pub fn allow<S: AsRef<str>>(actions: &[S], resources: Vec<Value>) -> Self {
        Self {
            effect: Effect::Allow,
            principal: None,
            actions: actions.iter().map(|a| a.as_ref().to_string()).collect(),
            resources,
        }
    }

    pub fn with_principal(mut self, principal: Value) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn matches(&self, action: &str, resource: &str) -> bool {
        let action_matches = self.actions.iter()
            .any(|a| wildcard_match(&a.to_ascii_lowercase(), &action.to_ascii_lowercase()));
        // unresolved intrinsics never match
        let resource_matches = self.resources.iter()
            .any(|r| r.as_str().map(|r| wildcard_match(r, resource)).unwrap_or(false));
        action_matches && resource_matches
    }

    /// true if this statement alone grants `action` on `resource`.
    pub fn allows(&self, action: &str, resource: &str) -> bool {
        self.effect == Effect::Allow && self.matches(action, resource)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.actions.is_empty() {
            return Err("Policy statement must have at least one action".to_string());
        }
        if self.resources.is_empty() && self.principal.is_none() {
            return Err("Policy statement must name at least one resource".to_string());
        }
        for action in self.actions.iter() {
            if action != "*" && !action.contains(':') {
                return Err(format!("Invalid action {:?}\nMust be of the form service:Action", action));
            }
        }
        Ok(())
    }
}

pub fn policy_document(statements: &[PolicyStatement]) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": statements,
    })
}

/// Evaluates a (resolved) policy document: an explicit Deny wins, otherwise
/// any Allow grants.
pub fn document_allows(document: &Value, action: &str, resource: &str) -> bool {
    let statements: Vec<PolicyStatement> = match document.get("Statement") {
        Some(Value::Array(items)) => items.iter().filter_map(|s| serde_json::from_value(s.clone()).ok()).collect(),
        Some(single) => serde_json::from_value(single.clone()).ok().into_iter().collect(),
        None => vec![],
    };
    if statements.iter().any(|s| s.effect == Effect::Deny && s.matches(action, resource)) {
        return false;
    }
    statements.iter().any(|s| s.allows(action, resource))
}

/// IAM style glob: `*` matches any run of characters, `?` exactly one.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

fn one_or_many_values<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        other => vec![other],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAM_ARN: &str = "arn:aws:ssm:us-east-1:123456789012:parameter/blog/lambdaEdgeLambdaVersion";

    #[test]
    fn wildcards() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("arn:aws:ssm:*:*:parameter/blog/*", PARAM_ARN));
        assert!(wildcard_match("ssm:Get?arameter", "ssm:GetParameter"));
        assert!(!wildcard_match("arn:aws:ssm:eu-west-2:*", PARAM_ARN));
        assert!(!wildcard_match("ssm:GetParameters", "ssm:GetParameter"));
    }

    #[test]
    fn exact_grant_only_covers_its_parameter() {
        let s = PolicyStatement::allow(&["ssm:GetParameter"], vec![json!(PARAM_ARN)]);
        assert!(s.allows("ssm:GetParameter", PARAM_ARN));
        assert!(s.allows("SSM:getparameter", PARAM_ARN));
        assert!(!s.allows("ssm:PutParameter", PARAM_ARN));
        assert!(!s.allows("ssm:GetParameter", "arn:aws:ssm:us-east-1:123456789012:parameter/other"));
    }

    #[test]
    fn deny_overrides_allow_in_documents() {
        let mut deny = PolicyStatement::allow(&["ssm:*"], vec![json!("*")]);
        deny.effect = Effect::Deny;
        let doc = policy_document(&[PolicyStatement::allow(&["ssm:GetParameter"], vec![json!(PARAM_ARN)]), deny]);
        assert!(!document_allows(&doc, "ssm:GetParameter", PARAM_ARN));
    }

    #[test]
    fn documents_accept_single_strings() {
        let doc = json!({
            "Version": "2012-10-17",
            "Statement": { "Effect": "Allow", "Action": "ssm:GetParameter", "Resource": PARAM_ARN }
        });
        assert!(document_allows(&doc, "ssm:GetParameter", PARAM_ARN));
    }

    #[test]
    fn unresolved_resources_grant_nothing() {
        let s = PolicyStatement::allow(&["ssm:GetParameter"], vec![json!({ "Fn::Sub": "arn:${AWS::Partition}:ssm" })]);
        assert!(!s.allows("ssm:GetParameter", PARAM_ARN));
    }
}
