use aws_cfn_stack::CfnResource;
use serde_json::{json, Value};

/// `A` alias record pointing a name at an AWS-managed endpoint.
pub struct AliasRecord {
    pub name: String,
    /// zone holding the record. Must end in `.`.
    pub hosted_zone_name: String,
    pub target_dns_name: Value,
    pub target_hosted_zone_id: String,
}

impl AliasRecord {
    /// guesses the zone from the last two labels of `name`.
    pub fn new(name: &str, target_dns_name: Value, target_hosted_zone_id: &str) -> Self {
        let labels: Vec<&str> = name.split('.').collect();
        let zone = labels[labels.len().saturating_sub(2)..].join(".");
        Self {
            name: name.to_string(),
            hosted_zone_name: format!("{zone}."),
            target_dns_name,
            target_hosted_zone_id: target_hosted_zone_id.to_string(),
        }
    }
}

impl CfnResource for AliasRecord {
    fn type_string(&self) -> &'static str {
        "AWS::Route53::RecordSet"
    }

    fn properties(&self) -> Value {
        json!({
            "HostedZoneName": self.hosted_zone_name,
            "Name": self.name,
            "Type": "A",
            "AliasTarget": {
                "DNSName": self.target_dns_name,
                "HostedZoneId": self.target_hosted_zone_id,
            },
        })
    }

    fn validate(&self) -> Result<(), String> {
        if !self.hosted_zone_name.ends_with('.') {
            return Err(format!("Invalid hosted zone name {:?}\nMust end in '.'", self.hosted_zone_name));
        }
        let zone = self.hosted_zone_name.trim_end_matches('.');
        if self.name != zone && !self.name.ends_with(&format!(".{zone}")) {
            return Err(format!("Record {:?} is not inside zone {:?}", self.name, self.hosted_zone_name));
        }
        Ok(())
    }
}
