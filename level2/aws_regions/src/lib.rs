/// Lambda@Edge functions and the ACM certificates attached to CloudFront
/// distributions can only be created here, regardless of where the rest of
/// the application lives.
pub const EDGE_REGION: &str = "us-east-1";

/// Commercial regions a website stack can be deployed to, with their location.
/// China and GovCloud are left out: CloudFront with Lambda@Edge is not offered there.
pub const COMMERCIAL_REGIONS: &[(&str, &str)] = &[
    ("us-east-1", "N. Virginia"),
    ("us-east-2", "Ohio"),
    ("us-west-1", "N. California"),
    ("us-west-2", "Oregon"),
    ("ca-central-1", "Canada Central"),
    ("eu-north-1", "Stockholm"),
    ("eu-west-1", "Ireland"),
    ("eu-west-2", "London"),
    ("eu-west-3", "Paris"),
    ("eu-central-1", "Frankfurt"),
    ("eu-central-2", "Zurich"),
    ("eu-south-1", "Milan"),
    ("eu-south-2", "Spain"),
    ("ap-south-1", "Mumbai"),
    ("ap-south-2", "Hyderabad"),
    ("ap-east-1", "Hong Kong"),
    ("ap-northeast-1", "Tokyo"),
    ("ap-northeast-2", "Seoul"),
    ("ap-northeast-3", "Osaka"),
    ("ap-southeast-1", "Singapore"),
    ("ap-southeast-2", "Sydney"),
    ("ap-southeast-3", "Jakarta"),
    ("ap-southeast-4", "Melbourne"),
    ("sa-east-1", "Sao Paulo"),
    ("me-south-1", "Bahrain"),
    ("me-central-1", "UAE"),
    ("af-south-1", "Cape Town"),
    ("il-central-1", "Tel Aviv"),
];

pub fn location(region: &str) -> Option<&'static str> {
    COMMERCIAL_REGIONS.iter().find(|(code, _)| *code == region).map(|(_, name)| *name)
}

/// None when `region` is usable, otherwise a message listing the valid codes.
pub fn verify_region(region: &str) -> Option<String> {
    if location(region).is_some() {
        return None;
    }
    let codes: Vec<&str> = COMMERCIAL_REGIONS.iter().map(|(code, _)| *code).collect();
    Some(format!("Invalid region code {:?}\nMust be one of {}", region, codes.join(", ")))
}

/// `arn:aws:{service}:{region}:`, the part of an ARN that pins it to a region.
pub fn arn_prefix(service: &str, region: &str) -> String {
    format!("arn:aws:{service}:{region}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_region_is_deployable() {
        assert_eq!(location(EDGE_REGION), Some("N. Virginia"));
        assert_eq!(arn_prefix("acm", EDGE_REGION), "arn:aws:acm:us-east-1:");
    }

    #[test]
    fn rejects_unknown_region() {
        let err = verify_region("cn-north-1").unwrap();
        assert!(err.starts_with("Invalid region code \"cn-north-1\""));
        assert!(err.contains("eu-west-2"));
        assert!(verify_region("eu-west-2").is_none());
    }
}
