use aws_cfn_stack::{CfnResource, DeletionPolicy};
use serde_json::{json, Value};

use super::policy::{policy_document, PolicyStatement};

pub struct Bucket {
    pub bucket_name: String,
    /// when set, the bucket gets static website hosting with this index document.
    pub index_document: Option<String>,
    /// delete the bucket together with the stack instead of orphaning it.
    pub destroy_with_stack: bool,
}

impl CfnResource for Bucket {
    fn type_string(&self) -> &'static str {
        "AWS::S3::Bucket"
    }

    fn properties(&self) -> Value {
        let mut props = json!({ "BucketName": self.bucket_name });
        if let Some(index) = &self.index_document {
            props["WebsiteConfiguration"] = json!({ "IndexDocument": index });
        }
        props
    }

    fn validate(&self) -> Result<(), String> {
        verify_bucket_name(&self.bucket_name).map_or(Ok(()), Err)
    }

    fn deletion_policy(&self) -> Option<DeletionPolicy> {
        Some(if self.destroy_with_stack { DeletionPolicy::Delete } else { DeletionPolicy::Retain })
    }
}

pub struct BucketPolicy {
    pub bucket: Value,
    pub statements: Vec<PolicyStatement>,
}

impl CfnResource for BucketPolicy {
    fn type_string(&self) -> &'static str {
        "AWS::S3::BucketPolicy"
    }

    fn properties(&self) -> Value {
        json!({
            "Bucket": self.bucket,
            "PolicyDocument": policy_document(&self.statements),
        })
    }

    fn validate(&self) -> Result<(), String> {
        for statement in self.statements.iter() {
            if statement.principal.is_none() {
                return Err("Bucket policy statements need a principal".to_string());
            }
            statement.validate()?;
        }
        Ok(())
    }
}

pub fn verify_bucket_name(name: &str) -> Option<String> {
    if name.len() < 3 || name.len() > 63 {
        return Some(format!("Invalid bucket name {:?}\nMust be between 3 and 63 characters", name));
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.') {
        return Some(format!("Invalid bucket name {:?}\nMust only contain lowercase letters, numbers, dots and hyphens", name));
    }
    let first_last_ok = |c: Option<char>| c.map(|c| c.is_ascii_lowercase() || c.is_ascii_digit()).unwrap_or(false);
    if !first_last_ok(name.chars().next()) || !first_last_ok(name.chars().last()) {
        return Some(format!("Invalid bucket name {:?}\nMust begin and end with a letter or number", name));
    }
    if name.contains("..") {
        return Some(format!("Invalid bucket name {:?}\nMust not contain two adjacent periods", name));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names() {
        assert!(verify_bucket_name("website-123456789012").is_none());
        assert!(verify_bucket_name("Website").is_some());
        assert!(verify_bucket_name("ab").is_some());
        assert!(verify_bucket_name("-abc").is_some());
        assert!(verify_bucket_name("a..b").is_some());
    }

    #[test]
    fn website_bucket_is_destroyed_with_stack() {
        let b = Bucket { bucket_name: "website-123456789012".into(), index_document: Some("index.html".into()), destroy_with_stack: true };
        assert_eq!(b.deletion_policy(), Some(DeletionPolicy::Delete));
        assert_eq!(b.properties()["WebsiteConfiguration"]["IndexDocument"], "index.html");
    }
}
