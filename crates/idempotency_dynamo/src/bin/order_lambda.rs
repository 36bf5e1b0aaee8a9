use idempotency_core::clock::SystemClock;
use idempotency_core::config::IdempotencyConfig;
use idempotency_core::encoding::resolve_env_var_choice;
use idempotency_dynamo::adapters::record_store::DynamoRecordStore;
use idempotency_dynamo::handlers::order::{handle_order_payload, OrderSuccessResponse};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;

async fn handle_request(event: LambdaEvent<Value>) -> Result<OrderSuccessResponse, Error> {
    let table_name = std::env::var("IDEMPOTENCY_TABLE")
        .map_err(|_| Error::from("IDEMPOTENCY_TABLE must be configured"))?;
    let namespace = resolve_env_var_choice(
        std::env::var("AWS_LAMBDA_FUNCTION_NAME")
            .ok()
            .map(|function_name| format!("{function_name}.handler")),
        std::env::var("IDEMPOTENCY_NAMESPACE").ok(),
    )
    .unwrap_or_else(|| "local.handler".to_string());

    let config = IdempotencyConfig::from_env().map_err(|error| Error::from(error.to_string()))?;

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store = DynamoRecordStore::new(aws_sdk_dynamodb::Client::new(&aws_config), table_name);
    let clock = SystemClock;

    handle_order_payload(&event.payload, &namespace, &store, &clock, &config)
        .map_err(|error| Error::from(error.message))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_runtime::run(service_fn(handle_request)).await
}
