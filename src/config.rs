use std::ffi::OsString;
use std::path::PathBuf;

use aws_ssm_parameter::ParameterPath;
use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};

use crate::deploy::Units;
use crate::error::{ConfigError, EXIT_USAGE};

/// OpenAPI document used when `--apiSpec` is not given.
pub const DEFAULT_API_TEMPLATE: &str = include_str!("../api.yaml");

#[derive(Parser, Debug)]
#[command(name = "blogstack", version, about = "Static website + Lambda@Edge rewrite function on AWS")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write both CloudFormation templates and the rendered OpenAPI document without calling AWS.
    Synth {
        #[command(flatten)]
        stack: StackArgs,
        #[arg(long, default_value = "blogstack.out")]
        out: PathBuf,
    },
    /// Publish assets and apply the stacks with CloudFormation.
    Deploy {
        #[command(flatten)]
        stack: StackArgs,
        #[arg(long, value_enum, default_value_t = Units::All)]
        unit: Units,
    },
    /// Apply the stacks against a local, file-backed stand-in for AWS.
    Simulate {
        #[command(flatten)]
        stack: StackArgs,
        #[arg(long, value_enum, default_value_t = Units::All)]
        unit: Units,
        /// where the simulated account state is kept between runs.
        #[arg(long)]
        state: PathBuf,
    },
}

impl Command {
    pub fn stack_args(&self) -> &StackArgs {
        match self {
            Command::Synth { stack, .. } => stack,
            Command::Deploy { stack, .. } => stack,
            Command::Simulate { stack, .. } => stack,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StackArgs {
    /// Domain name of the website.
    #[arg(long = "domainName")]
    pub domain_name: String,
    /// AWS target account.
    #[arg(long = "targetAccount")]
    pub target_account: String,
    /// AWS region of the deployment.
    #[arg(long = "region")]
    pub region: String,
    /// Path to the hello world API lambda bundle.
    #[arg(long = "apiLambdaPath")]
    pub api_lambda_path: PathBuf,
    /// Path to the Lambda@Edge function for rewriting CloudFront requests.
    #[arg(long = "lambdaEdgeLambdaPath")]
    pub lambda_edge_lambda_path: PathBuf,
    /// Path to the parameter bridge lambda bundle.
    #[arg(long = "bridgeLambdaPath")]
    pub bridge_lambda_path: PathBuf,
    /// Directory holding the static website.
    #[arg(long = "webAssets")]
    pub web_assets: PathBuf,
    /// Route53 hosted zone of the domain. Looked up by name when omitted.
    #[arg(long = "hostedZoneId", env = "BLOGSTACK_HOSTED_ZONE_ID")]
    pub hosted_zone_id: Option<String>,
    /// Use an existing us-east-1 certificate instead of creating one in the edge stack.
    #[arg(long = "certificateArn", env = "BLOGSTACK_CERTIFICATE_ARN")]
    pub certificate_arn: Option<String>,
    /// Also deploy the hello world API behind /api/*.
    #[arg(long = "enableApi")]
    pub enable_api: bool,
    /// OpenAPI template with a {{helloworld-lambda}} placeholder.
    #[arg(long = "apiSpec")]
    pub api_spec: Option<PathBuf>,
}

/// Failure to parse the command line. `code` is the process exit status.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageError {
    pub code: i32,
    pub message: String,
}

pub fn parse_args<I, T>(args: I) -> Result<Cli, UsageError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|e| UsageError {
        // help and version go to stdout and are not failures
        code: if e.use_stderr() { EXIT_USAGE } else { 0 },
        message: e.render().to_string(),
    })
}

/// A flag value clap accepted but validation rejected, rendered as a clap
/// error with the usage line included.
pub fn invalid_value(err: &ConfigError) -> UsageError {
    let rendered = Cli::command().error(ErrorKind::ValueValidation, err).render();
    UsageError { code: EXIT_USAGE, message: rendered.to_string() }
}

/// Everything a deployment needs, validated once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct StackConfig {
    pub domain_name: String,
    pub target_account: String,
    pub region: String,
    pub api_lambda_path: PathBuf,
    pub lambda_edge_lambda_path: PathBuf,
    pub bridge_lambda_path: PathBuf,
    pub web_assets: PathBuf,
    pub hosted_zone_id: Option<String>,
    pub certificate_arn: Option<String>,
    pub enable_api: bool,
    pub api_template: String,
}

impl StackConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, UsageError> {
        Self::from_args(cli.command.stack_args()).map_err(|e| invalid_value(&e))
    }

    pub fn from_args(args: &StackArgs) -> Result<Self, ConfigError> {
        if let Some(reason) = aws_regions::verify_region(&args.region) {
            return Err(ConfigError::Invalid { field: "region", reason });
        }
        if let Some(reason) = verify_account(&args.target_account) {
            return Err(ConfigError::Invalid { field: "targetAccount", reason });
        }
        if let Some(reason) = verify_domain(&args.domain_name) {
            return Err(ConfigError::Invalid { field: "domainName", reason });
        }
        let certificate_arn = args.certificate_arn.clone().filter(|a| !a.is_empty());
        if let Some(arn) = &certificate_arn {
            let prefix = aws_regions::arn_prefix("acm", aws_regions::EDGE_REGION);
            if !arn.starts_with(&prefix) {
                return Err(ConfigError::Invalid {
                    field: "certificateArn",
                    reason: format!("{arn:?} must be an ACM certificate in {}", aws_regions::EDGE_REGION),
                });
            }
        }
        let api_template = match &args.api_spec {
            Some(path) => std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_API_TEMPLATE.to_string(),
        };
        Ok(Self {
            domain_name: args.domain_name.to_ascii_lowercase(),
            target_account: args.target_account.clone(),
            region: args.region.clone(),
            api_lambda_path: args.api_lambda_path.clone(),
            lambda_edge_lambda_path: args.lambda_edge_lambda_path.clone(),
            bridge_lambda_path: args.bridge_lambda_path.clone(),
            web_assets: args.web_assets.clone(),
            hosted_zone_id: args.hosted_zone_id.as_deref().map(normalize_zone_id).filter(|z| !z.is_empty()),
            certificate_arn,
            enable_api: args.enable_api,
            api_template,
        })
    }

    pub fn www_domain(&self) -> String {
        format!("www.{}", self.domain_name)
    }

    pub fn website_bucket_name(&self) -> String {
        format!("website-{}", self.target_account)
    }

    pub fn edge_parameter_path(&self) -> ParameterPath {
        ParameterPath::lambda_edge_version()
    }

    pub fn edge_parameter_arn(&self) -> String {
        self.edge_parameter_path().arn(aws_regions::EDGE_REGION, &self.target_account)
    }
}

/// Route53 hands out ids as `/hostedzone/Z123`; templates want the bare id.
pub fn normalize_zone_id(id: &str) -> String {
    id.trim().trim_start_matches("/hostedzone/").to_string()
}

fn verify_account(account: &str) -> Option<String> {
    if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("Invalid account id {:?}\nMust be exactly 12 digits", account));
    }
    None
}

fn verify_domain(domain: &str) -> Option<String> {
    if domain.ends_with('.') {
        return Some(format!("Invalid domain {:?}\nMust not end with a dot", domain));
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Some(format!("Invalid domain {:?}\nMust have at least two labels, eg: example.com", domain));
    }
    for label in labels {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Some(format!("Invalid domain {:?}\nlabel {:?} must be 1-63 alphanumeric characters or hyphens", domain, label));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Vec<&'static str> {
        vec![
            "blogstack", "synth",
            "--domainName", "example.com",
            "--targetAccount", "123456789012",
            "--region", "eu-west-2",
            "--apiLambdaPath", "api.zip",
            "--lambdaEdgeLambdaPath", "edge",
            "--bridgeLambdaPath", "bridge",
            "--webAssets", "public",
        ]
    }

    fn config_from(argv: Vec<&str>) -> Result<StackConfig, ConfigError> {
        let cli = parse_args(argv).unwrap();
        StackConfig::from_args(cli.command.stack_args())
    }

    #[test]
    fn parses_all_required_flags() {
        let config = config_from(args()).unwrap();
        assert_eq!(config.domain_name, "example.com");
        assert_eq!(config.www_domain(), "www.example.com");
        assert_eq!(config.website_bucket_name(), "website-123456789012");
        assert_eq!(
            config.edge_parameter_arn(),
            "arn:aws:ssm:us-east-1:123456789012:parameter/blog/lambdaEdgeLambdaVersion"
        );
        assert!(!config.enable_api);
        assert_eq!(config.api_template, DEFAULT_API_TEMPLATE);
    }

    #[test]
    fn missing_region_is_usage_error() {
        let argv: Vec<&str> = args().into_iter().filter(|a| *a != "--region" && *a != "eu-west-2").collect();
        let err = parse_args(argv).unwrap_err();
        assert_eq!(err.code, 1);
        assert!(err.message.contains("--region"));
        assert!(err.message.contains("Usage"));
    }

    #[test]
    fn help_is_not_a_failure() {
        let err = parse_args(["blogstack", "--help"]).unwrap_err();
        assert_eq!(err.code, 0);
    }

    #[test]
    fn rejects_bad_values() {
        let mut argv = args();
        argv[7] = "mars-north-1";
        assert!(matches!(config_from(argv), Err(ConfigError::Invalid { field: "region", .. })));

        let mut argv = args();
        argv[5] = "1234";
        assert!(matches!(config_from(argv), Err(ConfigError::Invalid { field: "targetAccount", .. })));

        let mut argv = args();
        argv[3] = "localhost";
        assert!(matches!(config_from(argv), Err(ConfigError::Invalid { field: "domainName", .. })));

        let mut argv = args();
        argv.extend(["--certificateArn", "arn:aws:acm:eu-west-2:123456789012:certificate/abc"]);
        assert!(matches!(config_from(argv), Err(ConfigError::Invalid { field: "certificateArn", .. })));
    }

    #[test]
    fn rejected_value_comes_with_usage() {
        let mut argv = args();
        argv[7] = "moon-1";
        let cli = parse_args(argv).unwrap();
        let err = StackConfig::from_cli(&cli).unwrap_err();
        assert_eq!(err.code, EXIT_USAGE);
        assert!(err.message.contains("Invalid region code \"moon-1\""), "{}", err.message);
        assert!(err.message.contains("Usage"), "{}", err.message);
    }

    #[test]
    fn hosted_zone_prefix_is_stripped() {
        let mut argv = args();
        argv.extend(["--hostedZoneId", "/hostedzone/Z0123"]);
        assert_eq!(config_from(argv).unwrap().hosted_zone_id.as_deref(), Some("Z0123"));
    }
}
