use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("payload is not serializable: {message}")]
pub struct UnserializablePayload {
    pub message: String,
}

/// Reduce a payload to canonical JSON: object keys sorted at every level, no
/// incidental whitespace. Structurally equal payloads canonicalize
/// identically regardless of field order or construction shape.
pub fn canonical_payload_json<P: Serialize>(payload: &P) -> Result<String, UnserializablePayload> {
    let value = serde_json::to_value(payload).map_err(|error| UnserializablePayload {
        message: error.to_string(),
    })?;
    serde_json::to_string(&value).map_err(|error| UnserializablePayload {
        message: error.to_string(),
    })
}

/// Derive the idempotency key for one unit of work: the execution namespace
/// joined with a Sha256 fingerprint of the canonical payload.
pub fn derive_key<P: Serialize>(
    namespace: &str,
    payload: &P,
) -> Result<String, UnserializablePayload> {
    let canonical = canonical_payload_json(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{namespace}#{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[derive(Serialize)]
    struct Transfer {
        currency: String,
        amount: u64,
    }

    #[test]
    fn field_order_does_not_change_the_key() {
        let declared_order = Transfer {
            currency: "EUR".to_string(),
            amount: 250,
        };
        let alphabetical = json!({"amount": 250, "currency": "EUR"});

        let from_struct =
            derive_key("fn.handler", &declared_order).expect("struct payload should derive");
        let from_value =
            derive_key("fn.handler", &alphabetical).expect("value payload should derive");

        assert_eq!(from_struct, from_value);
    }

    #[test]
    fn distinct_payloads_derive_distinct_keys() {
        let first = derive_key("fn.handler", &json!({"amount": 250})).expect("should derive");
        let second = derive_key("fn.handler", &json!({"amount": 251})).expect("should derive");

        assert_ne!(first, second);
    }

    #[test]
    fn distinct_namespaces_derive_distinct_keys() {
        let payload = json!({"amount": 250});
        let first = derive_key("fn.handler", &payload).expect("should derive");
        let second = derive_key("other_fn.handler", &payload).expect("should derive");

        assert_ne!(first, second);
    }

    #[test]
    fn key_is_namespace_joined_with_hex_fingerprint() {
        let key = derive_key("fn.handler", &json!({"amount": 250})).expect("should derive");

        let (namespace, fingerprint) = key.split_once('#').expect("key should contain separator");
        assert_eq!(namespace, "fn.handler");
        assert_eq!(fingerprint.len(), 64);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn unserializable_payload_surfaces_structured_error() {
        let payload: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);

        let error = derive_key("fn.handler", &payload).expect_err("tuple keys should not derive");
        assert!(error.to_string().starts_with("payload is not serializable"));
    }
}
