//! Simulated create/update/delete for the built-in resource types the stacks use.

use std::collections::BTreeMap;

use aws_cfn_stack::SavedResource;
use aws_ssm_parameter::{InMemoryParameterStore, ParameterPath};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use crate::resources::verify_bucket_name;
use super::state::{EngineState, ProvisionedResource};
use super::EngineError;

pub struct Provisioner<'a> {
    pub account: &'a str,
    pub region: &'a str,
    pub stack_name: &'a str,
    pub parameters: &'a InMemoryParameterStore,
}

fn invalid(id: &str, reason: impl std::fmt::Display) -> EngineError {
    EngineError::InvalidProperty(format!("{id}: {reason}"))
}

fn required_str<'v>(props: &'v Value, key: &str, id: &str) -> Result<&'v str, EngineError> {
    props.get(key).and_then(Value::as_str).ok_or_else(|| invalid(id, format!("{key} must be a string")))
}

fn optional_str<'v>(props: &'v Value, key: &str) -> Option<&'v str> {
    props.get(key).and_then(Value::as_str)
}

/// Deterministic pseudo random id material, `len` characters from `alphabet`.
fn generated_id(state: &mut EngineState, account: &str, alphabet: &[u8], len: usize) -> String {
    let seed = (u64::from(adler::adler32_slice(account.as_bytes())) << 32) ^ state.next_sequence();
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char).collect()
}

const UPPER_ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const LOWER_ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const HEX: &[u8] = b"0123456789abcdef";

fn truncated(name: String, max: usize) -> String {
    if name.len() <= max {
        name
    } else {
        name.chars().take(max).collect()
    }
}

/// A versioned function ARN in us-east-1, the only kind CloudFront accepts.
pub fn is_edge_version_arn(arn: &str) -> bool {
    let prefix = aws_regions::arn_prefix("lambda", aws_regions::EDGE_REGION);
    let Some(rest) = arn.strip_prefix(&prefix) else { return false };
    let parts: Vec<&str> = rest.split(':').collect();
    matches!(parts.as_slice(), [account, "function", name, version]
        if account.len() == 12
            && !name.is_empty()
            && !version.is_empty()
            && version.chars().all(|c| c.is_ascii_digit()))
}

impl Provisioner<'_> {
    /// Creates `logical_id`, or updates it when `previous` is the same
    /// resource from the last apply. Naming properties changing means a new
    /// physical resource; the caller cleans up the old one.
    pub fn apply(
        &self,
        state: &mut EngineState,
        logical_id: &str,
        saved: &SavedResource,
        properties: Value,
        previous: Option<&ProvisionedResource>,
        in_progress: &BTreeMap<String, ProvisionedResource>,
    ) -> Result<ProvisionedResource, EngineError> {
        let id = logical_id;
        let account = self.account;
        let region = self.region;
        let props = &properties;
        let keep_physical = |naming_key: Option<&str>| -> Option<String> {
            previous
                .filter(|p| naming_key.map(|k| p.properties.get(k) == props.get(k)).unwrap_or(true))
                .map(|p| p.physical_id.clone())
        };
        let mut attributes = BTreeMap::new();

        let physical_id = match saved.ty.as_str() {
            "AWS::IAM::Role" => {
                if !props.get("AssumeRolePolicyDocument").map(Value::is_object).unwrap_or(false) {
                    return Err(invalid(id, "AssumeRolePolicyDocument is required"));
                }
                let name = match keep_physical(Some("RoleName")) {
                    Some(name) => name,
                    None => match optional_str(props, "RoleName") {
                        Some(name) => name.to_string(),
                        None => {
                            let suffix = generated_id(state, account, UPPER_ALNUM, 12);
                            truncated(format!("{}-{id}-{suffix}", self.stack_name), 64)
                        }
                    },
                };
                attributes.insert("Arn".to_string(), json!(format!("arn:aws:iam::{account}:role/{name}")));
                name
            }
            "AWS::Lambda::Function" => {
                let code = props.get("Code").ok_or_else(|| invalid(id, "Code is required"))?;
                let bucket = required_str(code, "S3Bucket", id)?;
                let key = required_str(code, "S3Key", id)?;
                if bucket.is_empty() || key.is_empty() {
                    return Err(invalid(id, "code location is empty"));
                }
                let role = required_str(props, "Role", id)?;
                if !role.starts_with(&format!("arn:aws:iam::{account}:role/")) {
                    return Err(invalid(id, format!("{role} is not a role in this account")));
                }
                let name = match keep_physical(Some("FunctionName")) {
                    Some(name) => name,
                    None => match optional_str(props, "FunctionName") {
                        Some(name) => name.to_string(),
                        None => {
                            let suffix = generated_id(state, account, UPPER_ALNUM, 12);
                            truncated(format!("{}-{id}-{suffix}", self.stack_name), 64)
                        }
                    },
                };
                attributes.insert("Arn".to_string(), json!(format!("arn:aws:lambda:{region}:{account}:function:{name}")));
                name
            }
            "AWS::Lambda::Version" => {
                let function = required_str(props, "FunctionName", id)?;
                let base = if function.starts_with("arn:") {
                    function.to_string()
                } else {
                    format!("arn:aws:lambda:{region}:{account}:function:{function}")
                };
                let counter = state.version_counters.entry(base.clone()).or_insert(0);
                *counter += 1;
                let number = *counter;
                attributes.insert("Version".to_string(), json!(number.to_string()));
                attributes.insert("FunctionArn".to_string(), json!(base));
                format!("{base}:{number}")
            }
            "AWS::Lambda::Permission" => {
                required_str(props, "FunctionName", id)?;
                required_str(props, "Principal", id)?;
                match keep_physical(None) {
                    Some(existing) => existing,
                    None => format!("{}-{id}-{}", self.stack_name, generated_id(state, account, UPPER_ALNUM, 12)),
                }
            }
            "AWS::Logs::LogGroup" => {
                let name = required_str(props, "LogGroupName", id)?.to_string();
                attributes.insert("Arn".to_string(), json!(format!("arn:aws:logs:{region}:{account}:log-group:{name}:*")));
                name
            }
            "AWS::SSM::Parameter" => {
                let name = required_str(props, "Name", id)?;
                let path = ParameterPath::new(name).map_err(|e| invalid(id, e))?;
                let value = required_str(props, "Value", id)?;
                self.parameters.set(region, &path, value);
                tracing::info!(parameter = name, region, value, "parameter written");
                attributes.insert("Type".to_string(), json!("String"));
                attributes.insert("Value".to_string(), json!(value));
                name.to_string()
            }
            "AWS::S3::Bucket" => {
                let name = required_str(props, "BucketName", id)?;
                if let Some(reason) = verify_bucket_name(name) {
                    return Err(invalid(id, reason));
                }
                attributes.insert("Arn".to_string(), json!(format!("arn:aws:s3:::{name}")));
                attributes.insert("DomainName".to_string(), json!(format!("{name}.s3.amazonaws.com")));
                attributes.insert("RegionalDomainName".to_string(), json!(format!("{name}.s3.{region}.amazonaws.com")));
                attributes.insert("WebsiteURL".to_string(), json!(format!("http://{name}.s3-website.{region}.amazonaws.com")));
                name.to_string()
            }
            "AWS::S3::BucketPolicy" => {
                let bucket = required_str(props, "Bucket", id)?;
                if !props.get("PolicyDocument").map(Value::is_object).unwrap_or(false) {
                    return Err(invalid(id, "PolicyDocument is required"));
                }
                bucket.to_string()
            }
            "AWS::CloudFront::CloudFrontOriginAccessIdentity" => {
                let oai = match previous {
                    Some(p) => return Ok(ProvisionedResource { properties, ..p.clone() }),
                    None => format!("E{}", generated_id(state, account, UPPER_ALNUM, 13)),
                };
                attributes.insert("Id".to_string(), json!(oai));
                attributes.insert("S3CanonicalUserId".to_string(), json!(generated_id(state, account, HEX, 64)));
                oai
            }
            "AWS::CertificateManager::Certificate" => {
                required_str(props, "DomainName", id)?;
                if optional_str(props, "ValidationMethod") == Some("DNS")
                    && !props.get("DomainValidationOptions").map(Value::is_array).unwrap_or(false)
                {
                    return Err(invalid(id, "DNS validation needs DomainValidationOptions"));
                }
                match keep_physical(Some("DomainName")) {
                    Some(arn) => arn,
                    None => format!(
                        "arn:aws:acm:{region}:{account}:certificate/{}",
                        generated_id(state, account, HEX, 32)
                    ),
                }
            }
            "AWS::CloudFront::Distribution" => {
                self.check_distribution(state, id, props, in_progress)?;
                if let Some(p) = previous {
                    return Ok(ProvisionedResource { properties, ..p.clone() });
                }
                let distribution_id = format!("E{}", generated_id(state, account, UPPER_ALNUM, 13));
                let domain = format!("d{}.cloudfront.net", generated_id(state, account, LOWER_ALNUM, 13));
                attributes.insert("Id".to_string(), json!(distribution_id));
                attributes.insert("DomainName".to_string(), json!(domain));
                distribution_id
            }
            "AWS::Route53::RecordSet" => {
                let zone = required_str(props, "HostedZoneName", id)?.trim_end_matches('.').to_ascii_lowercase();
                let name = required_str(props, "Name", id)?.trim_end_matches('.').to_ascii_lowercase();
                if name != zone && !name.ends_with(&format!(".{zone}")) {
                    return Err(invalid(id, format!("{name} is not inside zone {zone}")));
                }
                let target = props.get("AliasTarget")
                    .map(|t| required_str(t, "DNSName", id))
                    .transpose()?
                    .ok_or_else(|| invalid(id, "only alias records are supported"))?;
                state.dns.insert(name.clone(), target.to_string());
                name
            }
            "AWS::ApiGateway::RestApi" => {
                let has_paths = props.get("Body").and_then(|b| b.get("paths")).map(Value::is_object).unwrap_or(false);
                if !has_paths {
                    return Err(invalid(id, "Body must be an OpenAPI document with paths"));
                }
                let api_id = match keep_physical(None) {
                    Some(existing) => existing,
                    None => generated_id(state, account, LOWER_ALNUM, 10),
                };
                attributes.insert("RootResourceId".to_string(), json!(generated_id(state, account, LOWER_ALNUM, 10)));
                api_id
            }
            "AWS::ApiGateway::Deployment" => {
                required_str(props, "RestApiId", id)?;
                generated_id(state, account, LOWER_ALNUM, 6)
            }
            "AWS::ApiGateway::Stage" => {
                required_str(props, "RestApiId", id)?;
                required_str(props, "DeploymentId", id)?;
                required_str(props, "StageName", id)?.to_string()
            }
            other => return Err(EngineError::Unsupported(format!("resource type {other} ({id})"))),
        };

        Ok(ProvisionedResource {
            logical_id: id.to_string(),
            ty: saved.ty.clone(),
            region: region.to_string(),
            physical_id,
            attributes,
            properties,
            deletion_policy: saved.deletion_policy,
            update_replace_policy: saved.update_replace_policy,
        })
    }

    /// CloudFront only replicates published versions from us-east-1, and only
    /// serves certificates from there.
    fn check_distribution(
        &self,
        state: &EngineState,
        id: &str,
        props: &Value,
        in_progress: &BTreeMap<String, ProvisionedResource>,
    ) -> Result<(), EngineError> {
        let config = props.get("DistributionConfig").ok_or_else(|| invalid(id, "DistributionConfig is required"))?;
        if let Some(cert) = config.get("ViewerCertificate").and_then(|c| optional_str(c, "AcmCertificateArn")) {
            if !cert.starts_with(&aws_regions::arn_prefix("acm", aws_regions::EDGE_REGION)) {
                return Err(invalid(id, format!("certificate {cert} is not in {}", aws_regions::EDGE_REGION)));
            }
        }
        let mut behaviors: Vec<&Value> = config.get("DefaultCacheBehavior").into_iter().collect();
        if let Some(Value::Array(extra)) = config.get("CacheBehaviors") {
            behaviors.extend(extra.iter());
        }
        for association in behaviors.iter().filter_map(|b| b.get("LambdaFunctionAssociations")).filter_map(Value::as_array).flatten() {
            let arn = required_str(association, "LambdaFunctionARN", id)?;
            if !is_edge_version_arn(arn) {
                return Err(invalid(id, format!("{arn} is not a published version in {}", aws_regions::EDGE_REGION)));
            }
            let published = state.published_versions().any(|v| v == arn)
                || in_progress.values().any(|r| r.ty == "AWS::Lambda::Version" && r.physical_id == arn);
            if !published {
                return Err(invalid(id, format!("function version {arn} does not exist")));
            }
        }
        Ok(())
    }

    pub fn delete(&self, state: &mut EngineState, resource: &ProvisionedResource) {
        match resource.ty.as_str() {
            "AWS::SSM::Parameter" => {
                if let Ok(path) = ParameterPath::new(&resource.physical_id) {
                    self.parameters.remove(&resource.region, &path);
                }
            }
            "AWS::Route53::RecordSet" => {
                state.dns.remove(&resource.physical_id);
            }
            _ => {}
        }
        tracing::info!(resource = %resource.logical_id, physical_id = %resource.physical_id, "deleted");
    }
}
