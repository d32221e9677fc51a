//! Typed CloudFormation resources. Each struct validates itself before it is
//! allowed into a template.

mod policy;
pub use policy::*;
mod iam;
pub use iam::*;
mod lambda;
pub use lambda::*;
mod ssm;
pub use ssm::*;
mod s3_bucket;
pub use s3_bucket::*;
mod cloudfront;
pub use cloudfront::*;
mod route53;
pub use route53::*;
mod acm;
pub use acm::*;
mod apigateway;
pub use apigateway::*;
mod bridge;
pub use bridge::*;
