use aws_lambda_events::apigw::{ApiGatewayProxyRequest, ApiGatewayProxyResponse};
use aws_lambda_events::encodings::Body;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::json;

fn hello_world() -> ApiGatewayProxyResponse {
    let mut resp = ApiGatewayProxyResponse::default();
    resp.status_code = 200;
    resp.body = Some(Body::Text(json!({ "message": "Hello World!" }).to_string()));
    resp
}

async fn service_func(event: LambdaEvent<ApiGatewayProxyRequest>) -> Result<ApiGatewayProxyResponse, Error> {
    tracing::debug!(path = ?event.payload.path, "request");
    Ok(hello_world())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(false)
        .without_time()
        .init();
    lambda_runtime::run(service_fn(service_func)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_with_greeting() {
        let resp = hello_world();
        assert_eq!(resp.status_code, 200);
        match resp.body {
            Some(Body::Text(text)) => {
                let v: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(v["message"], "Hello World!");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }
}
