use aws_cfn_stack::CfnResource;
use serde_json::{json, Value};

/// Route53 alias targets pointing at any CloudFront distribution use this zone.
pub const CLOUDFRONT_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

const S3_ORIGIN_ID: &str = "S3Origin";
const API_ORIGIN_ID: &str = "ApiOrigin";

pub struct OriginAccessIdentity {
    pub comment: String,
}

impl CfnResource for OriginAccessIdentity {
    fn type_string(&self) -> &'static str {
        "AWS::CloudFront::CloudFrontOriginAccessIdentity"
    }

    fn properties(&self) -> Value {
        json!({ "CloudFrontOriginAccessIdentityConfig": { "Comment": self.comment } })
    }
}

/// `/api/*` requests forwarded uncached to an API Gateway stage.
pub struct ApiBehavior {
    pub domain_name: Value,
}

pub struct Distribution {
    pub comment: String,
    pub aliases: Vec<String>,
    pub certificate_arn: Value,
    /// regional domain name of the bucket holding the site.
    pub s3_origin_domain: Value,
    pub origin_access_identity: Value,
    /// version ARN triggered on every viewer request of the default behavior.
    pub viewer_request_function: Option<Value>,
    pub api: Option<ApiBehavior>,
    pub default_root_object: String,
    pub price_class: String,
    pub default_ttl: u64,
    pub max_ttl: u64,
}

impl Distribution {
    pub fn new(comment: String, aliases: Vec<String>, certificate_arn: Value, s3_origin_domain: Value, origin_access_identity: Value) -> Self {
        Self {
            comment,
            aliases,
            certificate_arn,
            s3_origin_domain,
            origin_access_identity,
            viewer_request_function: None,
            api: None,
            default_root_object: "index.html".into(),
            price_class: "PriceClass_100".into(),
            default_ttl: 300,
            max_ttl: 300,
        }
    }
}

impl CfnResource for Distribution {
    fn type_string(&self) -> &'static str {
        "AWS::CloudFront::Distribution"
    }

    fn properties(&self) -> Value {
        let mut default_behavior = json!({
            "TargetOriginId": S3_ORIGIN_ID,
            "ViewerProtocolPolicy": "redirect-to-https",
            "AllowedMethods": ["GET", "HEAD"],
            "Compress": true,
            "DefaultTTL": self.default_ttl,
            "MaxTTL": self.max_ttl,
            "ForwardedValues": { "QueryString": false },
        });
        if let Some(version_arn) = &self.viewer_request_function {
            default_behavior["LambdaFunctionAssociations"] = json!([{
                "EventType": "viewer-request",
                "LambdaFunctionARN": version_arn,
            }]);
        }
        let mut origins = vec![json!({
            "Id": S3_ORIGIN_ID,
            "DomainName": self.s3_origin_domain,
            "S3OriginConfig": {
                "OriginAccessIdentity": { "Fn::Sub": ["origin-access-identity/cloudfront/${Oai}", { "Oai": self.origin_access_identity }] },
            },
        })];
        let mut config = json!({
            "Enabled": true,
            "Comment": self.comment,
            "Aliases": self.aliases,
            "DefaultRootObject": self.default_root_object,
            "HttpVersion": "http2",
            "PriceClass": self.price_class,
            "ViewerCertificate": {
                "AcmCertificateArn": self.certificate_arn,
                "MinimumProtocolVersion": "TLSv1.2_2021",
                "SslSupportMethod": "sni-only",
            },
            "CustomErrorResponses": [
                { "ErrorCode": 403, "ResponseCode": 200, "ResponsePagePath": "/index.html" },
                { "ErrorCode": 404, "ResponseCode": 200, "ResponsePagePath": "/index.html" },
            ],
            "DefaultCacheBehavior": default_behavior,
        });
        if let Some(api) = &self.api {
            origins.push(json!({
                "Id": API_ORIGIN_ID,
                "DomainName": api.domain_name,
                "CustomOriginConfig": { "OriginProtocolPolicy": "https-only" },
            }));
            config["CacheBehaviors"] = json!([{
                "PathPattern": "api/*",
                "TargetOriginId": API_ORIGIN_ID,
                "ViewerProtocolPolicy": "redirect-to-https",
                "AllowedMethods": ["GET", "HEAD", "OPTIONS", "PUT", "PATCH", "POST", "DELETE"],
                "DefaultTTL": 0,
                "MaxTTL": 0,
                "MinTTL": 0,
                "ForwardedValues": { "QueryString": true, "Headers": ["Authorization"] },
            }]);
        }
        config["Origins"] = Value::Array(origins);
        json!({ "DistributionConfig": config })
    }

    fn validate(&self) -> Result<(), String> {
        if self.aliases.is_empty() {
            return Err("Distribution needs at least one alias".to_string());
        }
        if self.certificate_arn.is_null() {
            return Err("Distribution with aliases needs a certificate".to_string());
        }
        if !matches!(self.price_class.as_str(), "PriceClass_100" | "PriceClass_200" | "PriceClass_All") {
            return Err(format!("Invalid price class {:?}", self.price_class));
        }
        if self.default_ttl > self.max_ttl {
            return Err(format!("DefaultTTL {} must not exceed MaxTTL {}", self.default_ttl, self.max_ttl));
        }
        if self.comment.len() > 128 {
            return Err("Distribution comment must be at most 128 characters".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_cfn_stack::{get_att, get_ref};

    fn distribution() -> Distribution {
        Distribution::new(
            "CloudFront distribution for example.com".into(),
            vec!["example.com".into(), "www.example.com".into()],
            get_ref("CertificateArn"),
            get_att("WebsiteBucket", "RegionalDomainName"),
            get_ref("WebsiteOriginAccessIdentity"),
        )
    }

    #[test]
    fn association_is_on_default_behavior() {
        let mut d = distribution();
        d.viewer_request_function = Some(get_att("LambdaEdgeVersionBridge", "Parameter.Value"));
        let props = d.properties();
        let assoc = &props["DistributionConfig"]["DefaultCacheBehavior"]["LambdaFunctionAssociations"][0];
        assert_eq!(assoc["EventType"], "viewer-request");
        assert_eq!(assoc["LambdaFunctionARN"], get_att("LambdaEdgeVersionBridge", "Parameter.Value"));
        assert!(props["DistributionConfig"].get("CacheBehaviors").is_none());
    }

    #[test]
    fn spa_error_pages_and_defaults() {
        let props = distribution().properties();
        let config = &props["DistributionConfig"];
        assert_eq!(config["PriceClass"], "PriceClass_100");
        assert_eq!(config["DefaultCacheBehavior"]["ViewerProtocolPolicy"], "redirect-to-https");
        assert_eq!(config["DefaultCacheBehavior"]["DefaultTTL"], 300);
        for resp in config["CustomErrorResponses"].as_array().unwrap() {
            assert_eq!(resp["ResponseCode"], 200);
            assert_eq!(resp["ResponsePagePath"], "/index.html");
        }
    }

    #[test]
    fn api_behavior_adds_origin() {
        let mut d = distribution();
        d.api = Some(ApiBehavior { domain_name: json!("abc.execute-api.eu-west-2.amazonaws.com") });
        let props = d.properties();
        assert_eq!(props["DistributionConfig"]["Origins"].as_array().unwrap().len(), 2);
        assert_eq!(props["DistributionConfig"]["CacheBehaviors"][0]["PathPattern"], "api/*");
    }

    #[test]
    fn validation() {
        assert!(distribution().validate().is_ok());
        let mut d = distribution();
        d.aliases.clear();
        assert!(d.validate().is_err());
        let mut d = distribution();
        d.default_ttl = 600;
        assert!(d.validate().is_err());
    }
}
