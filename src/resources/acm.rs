use aws_cfn_stack::CfnResource;
use serde_json::{json, Value};

/// DNS validated ACM certificate. Only works when the domain is hosted in
/// Route53 in the same account, since validation records are written there.
/// CloudFront only accepts certificates from us-east-1.
pub struct Certificate {
    /// fully qualified, can have 1 leading wildcard.
    pub domain_name: String,
    pub subject_alternative_names: Vec<String>,
    pub hosted_zone_id: Value,
}

impl CfnResource for Certificate {
    fn type_string(&self) -> &'static str {
        "AWS::CertificateManager::Certificate"
    }

    fn properties(&self) -> Value {
        let validation: Vec<Value> = std::iter::once(&self.domain_name)
            .chain(self.subject_alternative_names.iter())
            .map(|d| json!({ "DomainName": d, "HostedZoneId": self.hosted_zone_id }))
            .collect();
        json!({
            "DomainName": self.domain_name,
            "SubjectAlternativeNames": self.subject_alternative_names,
            "ValidationMethod": "DNS",
            "DomainValidationOptions": validation,
        })
    }

    fn validate(&self) -> Result<(), String> {
        for name in std::iter::once(&self.domain_name).chain(self.subject_alternative_names.iter()) {
            verify_certificate_domain(name)?;
        }
        Ok(())
    }
}

fn verify_certificate_domain(domain: &str) -> Result<(), String> {
    if domain.is_empty() {
        return Err("Must provide a domain name".to_string());
    }
    if domain.ends_with('.') {
        return Err(format!("{domain} is invalid. Must not end with a dot"));
    }
    if domain.contains('*') {
        if domain.matches('*').count() > 1 {
            return Err(format!("Must only provide 1 wildcard. {domain} is invalid."));
        }
        if !domain.starts_with("*.") {
            return Err(format!("If using a wildcard, it must be the first component of your domain, eg: \"*.something.com\". {domain} is invalid."));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_cfn_stack::get_ref;

    #[test]
    fn validates_every_name() {
        let cert = Certificate {
            domain_name: "example.com".into(),
            subject_alternative_names: vec!["www.example.com".into()],
            hosted_zone_id: get_ref("HostedZoneId"),
        };
        assert!(cert.validate().is_ok());
        assert_eq!(cert.properties()["DomainValidationOptions"].as_array().unwrap().len(), 2);

        let cert = Certificate { subject_alternative_names: vec!["a.*.example.com".into()], ..cert };
        assert!(cert.validate().unwrap_err().contains("first component"));
    }
}
