use idempotency_core::clock::Clock;
use idempotency_core::config::IdempotencyConfig;
use idempotency_core::coordinator::{IdempotencyError, LifecycleCoordinator};
use idempotency_core::store::RecordStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderReceipt {
    pub order_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderSuccessResponse {
    pub receipt: OrderReceipt,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderHandlerError {
    pub message: String,
    /// A concurrent invocation holds the key; the caller may retry.
    pub retryable: bool,
}

/// Accept an order payload at most once per payload content. Duplicate
/// deliveries within the result TTL are answered from the stored receipt
/// without re-processing the order.
pub fn handle_order_payload(
    payload: &Value,
    namespace: &str,
    store: &dyn RecordStore,
    clock: &dyn Clock,
    config: &IdempotencyConfig,
) -> Result<OrderSuccessResponse, OrderHandlerError> {
    let coordinator = LifecycleCoordinator::new(store, clock, config);
    let execution = coordinator
        .run(namespace, payload, || process_order(payload))
        .map_err(|error| OrderHandlerError {
            retryable: matches!(error, IdempotencyError::InProgress { .. }),
            message: error.to_string(),
        })?;

    let from_cache = execution.is_cached();
    Ok(OrderSuccessResponse {
        receipt: execution.into_inner(),
        from_cache,
    })
}

fn process_order(payload: &Value) -> Result<OrderReceipt, String> {
    let order_id = payload
        .get("order_id")
        .and_then(Value::as_str)
        .ok_or_else(|| "order_id is required".to_string())?;

    Ok(OrderReceipt {
        order_id: order_id.to_string(),
        status: "accepted".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::DateTime;
    use idempotency_core::clock::FixedClock;
    use idempotency_core::key::derive_key;
    use idempotency_core::store::MemoryRecordStore;
    use serde_json::json;

    use super::*;

    const NAMESPACE: &str = "orders.handler";

    fn clock_at_epoch() -> FixedClock {
        let start = DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp should be valid");
        FixedClock::at(start)
    }

    fn sample_payload() -> Value {
        json!({ "order_id": "order-001", "amount": 250 })
    }

    #[test]
    fn duplicate_delivery_is_answered_from_the_stored_receipt() {
        let store = MemoryRecordStore::new();
        let clock = clock_at_epoch();
        let config = IdempotencyConfig::default();

        let first = handle_order_payload(&sample_payload(), NAMESPACE, &store, &clock, &config)
            .expect("first delivery should be accepted");
        assert!(!first.from_cache);
        assert_eq!(first.receipt.order_id, "order-001");
        assert_eq!(first.receipt.status, "accepted");

        let second = handle_order_payload(&sample_payload(), NAMESPACE, &store, &clock, &config)
            .expect("duplicate delivery should be accepted");
        assert!(second.from_cache);
        assert_eq!(second.receipt, first.receipt);
    }

    #[test]
    fn invalid_order_fails_without_poisoning_the_key() {
        let store = MemoryRecordStore::new();
        let clock = clock_at_epoch();
        let config = IdempotencyConfig::default();
        let invalid = json!({ "amount": 250 });

        let error = handle_order_payload(&invalid, NAMESPACE, &store, &clock, &config)
            .expect_err("payload without order_id should fail");
        assert!(!error.retryable);
        assert!(error.message.contains("order_id is required"));

        let key = derive_key(NAMESPACE, &invalid).expect("key should derive");
        assert!(store.get(&key).expect("get should succeed").is_none());
    }

    #[test]
    fn concurrent_holder_surfaces_a_retryable_error() {
        let store = MemoryRecordStore::new();
        let clock = clock_at_epoch();
        let config = IdempotencyConfig::default();

        let key = derive_key(NAMESPACE, &sample_payload()).expect("key should derive");
        store
            .claim(&key, clock.now(), config.lock_ttl, config.result_ttl)
            .expect("competing claim should win");

        let error = handle_order_payload(&sample_payload(), NAMESPACE, &store, &clock, &config)
            .expect_err("held key should block");
        assert!(error.retryable);
    }

    #[test]
    fn expired_receipt_is_recomputed_as_a_new_generation() {
        let store = MemoryRecordStore::new();
        let clock = clock_at_epoch();
        let config = IdempotencyConfig {
            result_ttl: Duration::from_secs(60),
            ..IdempotencyConfig::default()
        };

        let first = handle_order_payload(&sample_payload(), NAMESPACE, &store, &clock, &config)
            .expect("first delivery should be accepted");
        assert!(!first.from_cache);

        clock.advance(Duration::from_secs(61));
        let later = handle_order_payload(&sample_payload(), NAMESPACE, &store, &clock, &config)
            .expect("delivery past the result TTL should be accepted");
        assert!(!later.from_cache);
    }
}
