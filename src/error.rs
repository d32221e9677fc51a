use thiserror::Error;

use crate::assets::AssetError;
use crate::engine::EngineError;
use crate::openapi::OpenApiError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Stack(#[from] aws_cfn_stack::StackError),

    #[error("Artifact error: {0}")]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Parameter(#[from] aws_ssm_parameter::ParameterError),

    #[error("OpenAPI error: {0}")]
    OpenApi(#[from] OpenApiError),

    #[error("Stack {stack} has no output {output}. {hint}")]
    MissingOutput { stack: String, output: String, hint: String },

    #[error("{service} call failed: {message}")]
    Aws { service: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DeployError>;

/// Process exit status for a failure.
pub const EXIT_USAGE: i32 = 1;
pub const EXIT_DEPLOY_FAILED: i32 = 2;

impl DeployError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::Config(_) => EXIT_USAGE,
            _ => EXIT_DEPLOY_FAILED,
        }
    }
}
