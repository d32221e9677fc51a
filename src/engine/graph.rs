use std::collections::{BTreeMap, BTreeSet};

use aws_cfn_stack::SavedTemplate;
use serde_json::Value;

use super::EngineError;

/// One `${...}` placeholder of an `Fn::Sub` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder<'a> {
    Literal(&'a str),
    /// `${!Name}`, which renders as `${Name}`.
    Escaped(&'a str),
    Variable(&'a str),
}

/// Splits an `Fn::Sub` string into literal text and placeholders.
pub fn sub_parts(s: &str) -> Result<Vec<Placeholder<'_>>, EngineError> {
    let mut parts = vec![];
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            parts.push(Placeholder::Literal(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| EngineError::InvalidProperty(format!("unterminated ${{ in {s:?}")))?;
        let name = after[..end].trim();
        match name.strip_prefix('!') {
            Some(escaped) => parts.push(Placeholder::Escaped(escaped)),
            None => parts.push(Placeholder::Variable(name)),
        }
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        parts.push(Placeholder::Literal(rest));
    }
    Ok(parts)
}

/// Logical ids (or parameter names) a value refers to through `Ref`,
/// `Fn::GetAtt` or `Fn::Sub`. Pseudo parameters are left out.
pub fn references(value: &Value) -> Result<BTreeSet<String>, EngineError> {
    let mut out = BTreeSet::new();
    collect_references(value, &BTreeSet::new(), &mut out)?;
    Ok(out)
}

fn collect_references(value: &Value, local: &BTreeSet<String>, out: &mut BTreeSet<String>) -> Result<(), EngineError> {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_references(item, local, out)?;
            }
        }
        Value::Object(map) if map.len() == 1 => {
            let Some((key, inner)) = map.iter().next() else { return Ok(()) };
            match (key.as_str(), inner) {
                ("Ref", Value::String(name)) => add_reference(name, local, out),
                ("Fn::GetAtt", Value::Array(parts)) => {
                    if let Some(Value::String(id)) = parts.first() {
                        add_reference(id, local, out);
                    }
                }
                ("Fn::GetAtt", Value::String(dotted)) => {
                    add_reference(dotted.split('.').next().unwrap_or_default(), local, out);
                }
                ("Fn::Sub", Value::String(s)) => collect_sub(s, local, out)?,
                ("Fn::Sub", Value::Array(parts)) => {
                    let mut local = local.clone();
                    if let Some(Value::Object(vars)) = parts.get(1) {
                        for (name, v) in vars {
                            collect_references(v, &BTreeSet::new(), out)?;
                            local.insert(name.clone());
                        }
                    }
                    if let Some(Value::String(s)) = parts.first() {
                        collect_sub(s, &local, out)?;
                    }
                }
                _ => collect_references(inner, local, out)?,
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_references(v, local, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn collect_sub(s: &str, local: &BTreeSet<String>, out: &mut BTreeSet<String>) -> Result<(), EngineError> {
    for part in sub_parts(s)? {
        if let Placeholder::Variable(name) = part {
            add_reference(name.split('.').next().unwrap_or_default(), local, out);
        }
    }
    Ok(())
}

fn add_reference(name: &str, local: &BTreeSet<String>, out: &mut BTreeSet<String>) {
    if !name.starts_with("AWS::") && !local.contains(name) {
        out.insert(name.to_string());
    }
}

/// For each resource, the resources that must exist before it.
pub fn dependencies(template: &SavedTemplate) -> Result<BTreeMap<String, BTreeSet<String>>, EngineError> {
    let mut deps = BTreeMap::new();
    for (id, resource) in template.resources.iter() {
        let mut needs = BTreeSet::new();
        for name in references(&resource.properties)? {
            if template.resources.contains_key(&name) {
                needs.insert(name);
            } else if !template.parameters.contains_key(&name) {
                return Err(EngineError::UnknownReference { resource: id.clone(), reference: name });
            }
        }
        for dependency in resource.depends_on.iter() {
            if !template.resources.contains_key(dependency) {
                return Err(EngineError::UnknownReference { resource: id.clone(), reference: dependency.clone() });
            }
            needs.insert(dependency.clone());
        }
        deps.insert(id.clone(), needs);
    }
    Ok(deps)
}

/// Kahn's algorithm. Ties are broken by logical id so the order is stable.
pub fn topological_order(template: &SavedTemplate) -> Result<Vec<String>, EngineError> {
    let deps = dependencies(template)?;
    let mut remaining: BTreeMap<&str, usize> = deps.iter().map(|(id, d)| (id.as_str(), d.len())).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, needs) in deps.iter() {
        for need in needs {
            dependents.entry(need.as_str()).or_default().push(id.as_str());
        }
    }
    let mut ready: BTreeSet<&str> = remaining.iter().filter(|(_, n)| **n == 0).map(|(id, _)| *id).collect();
    let mut order = Vec::with_capacity(deps.len());
    while let Some(id) = ready.pop_first() {
        remaining.remove(id);
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(n) = remaining.get_mut(dependent) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }
    if !remaining.is_empty() {
        return Err(EngineError::Cycle(remaining.keys().map(|k| k.to_string()).collect()));
    }
    Ok(order)
}
