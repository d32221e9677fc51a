//! Declares and deploys a static website on AWS: an S3 bucket behind a
//! CloudFront distribution whose viewer requests run through a Lambda@Edge
//! rewrite function, plus an optional hello world API.
//!
//! The edge function lives in us-east-1 and the website in any region. The
//! two stacks share exactly one value, the edge function's version ARN,
//! through an SSM parameter the web stack reads at deploy time.

pub mod assets;
pub mod config;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod openapi;
pub mod resources;
pub mod stacks;
pub mod telemetry;
pub mod token;
