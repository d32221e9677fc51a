use aws_ssm_parameter::SsmParameterStore;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use parameter_bridge::{
    send_response, CustomResourceProvider, CustomResourceRequest, CustomResourceResponse, ParameterBridge, ResponseStatus,
};
use serde_json::Value;

async fn handle_event(bridge: &ParameterBridge<SsmParameterStore>, event: LambdaEvent<Value>) -> Result<(), Error> {
    let (payload, _context) = event.into_parts();
    let response_url = payload.get("ResponseURL").and_then(Value::as_str).map(str::to_string);
    let (url, response) = match serde_json::from_value::<CustomResourceRequest>(payload) {
        Ok(request) => {
            tracing::info!(request_type = ?request.request_type, stack = %request.stack_id, "custom resource request");
            let response = bridge.handle(&request).await;
            (request.response_url, response)
        }
        Err(e) => {
            // without a response CloudFormation waits an hour before giving up
            let Some(url) = response_url else {
                return Err(Error::from(format!("unparseable custom resource request: {e}")));
            };
            tracing::error!(error = %e, "unparseable custom resource request");
            let response = CustomResourceResponse {
                status: ResponseStatus::Failed,
                reason: Some(format!("unparseable request: {e}")),
                physical_resource_id: "parameter-bridge-invalid-request".to_string(),
                stack_id: String::new(),
                request_id: String::new(),
                logical_resource_id: String::new(),
                data: Default::default(),
            };
            (url, response)
        }
    };
    tokio::task::spawn_blocking(move || send_response(&url, &response)).await??;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(false)
        .without_time()
        .init();
    let bridge = ParameterBridge::new(SsmParameterStore::new());
    let bridge = &bridge;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        handle_event(bridge, event).await
    })).await?;
    Ok(())
}
