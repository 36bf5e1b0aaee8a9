use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::IdempotencyConfig;
use crate::key::{derive_key, UnserializablePayload};
use crate::record::{Claim, RecordStatus};
use crate::store::{RecordStore, StoreError};

/// How a result was obtained: freshly computed by this invocation, or served
/// from a completed record written by an earlier one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution<T> {
    Fresh(T),
    Cached(T),
}

impl<T> Execution<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Fresh(value) | Self::Cached(value) => value,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error(transparent)]
    UnserializablePayload(#[from] UnserializablePayload),

    /// Another invocation currently holds the key and no cached result is
    /// available yet. Retryable by the invoker.
    #[error("execution already in progress for key {key}")]
    InProgress { key: String },

    #[error("completed record for key {key} holds no usable result: {message}")]
    CorruptStoredResult { key: String, message: String },

    #[error("work failed: {message}")]
    WorkFailed { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Orchestrates one execution attempt: derive the key, claim it, run the
/// protected work if the claim was won, persist the result or release the
/// claim on failure, and resolve conflicts by reading the current record.
///
/// Stateless between invocations; the only shared mutable resource is the
/// record behind the store.
pub struct LifecycleCoordinator<'a> {
    store: &'a dyn RecordStore,
    clock: &'a dyn Clock,
    config: &'a IdempotencyConfig,
}

impl<'a> LifecycleCoordinator<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        clock: &'a dyn Clock,
        config: &'a IdempotencyConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Run `work` at most once per namespace + payload within the result
    /// TTL. Returns the fresh result, the cached one, or a retryable
    /// in-progress signal when another caller holds the key.
    pub fn run<P, T, F>(
        &self,
        namespace: &str,
        payload: &P,
        work: F,
    ) -> Result<Execution<T>, IdempotencyError>
    where
        P: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, String>,
    {
        if !self.config.enabled {
            return work()
                .map(Execution::Fresh)
                .map_err(|message| IdempotencyError::WorkFailed { message });
        }

        let key = derive_key(namespace, payload)?;
        match self.store.claim(
            &key,
            self.clock.now(),
            self.config.lock_ttl,
            self.config.result_ttl,
        ) {
            Ok(claim) => self.run_claimed(&key, claim, work),
            Err(error) if error.is_conflict() => self.resolve_conflict(&key, work),
            Err(error) => Err(error.into()),
        }
    }

    fn run_claimed<T, F>(
        &self,
        key: &str,
        claim: Claim,
        work: F,
    ) -> Result<Execution<T>, IdempotencyError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, String>,
    {
        log_event("claim_acquired", json!({ "key": key }));

        let result = match work() {
            Ok(result) => result,
            Err(message) => {
                self.release_after_failure(key, &claim);
                return Err(IdempotencyError::WorkFailed { message });
            }
        };

        let data = match serde_json::to_string(&result) {
            Ok(data) => data,
            Err(error) => {
                self.release_after_failure(key, &claim);
                return Err(UnserializablePayload {
                    message: error.to_string(),
                }
                .into());
            }
        };

        match self.store.complete(
            key,
            &claim,
            &data,
            self.clock.now(),
            self.config.result_ttl,
        ) {
            Ok(()) => Ok(Execution::Fresh(result)),
            Err(error) if error.is_conflict() => {
                // The lock was reclaimed as abandoned while the work was
                // still running. The result stands for this caller; only the
                // cache write is lost.
                log_event("result_persist_lost_race", json!({ "key": key }));
                Ok(Execution::Fresh(result))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn release_after_failure(&self, key: &str, claim: &Claim) {
        match self.store.release(key, claim) {
            Ok(()) => log_event("claim_released", json!({ "key": key })),
            Err(error) => log_error(
                "claim_release_failed",
                json!({ "key": key, "error": error.to_string() }),
            ),
        }
    }

    fn resolve_conflict<T, F>(&self, key: &str, work: F) -> Result<Execution<T>, IdempotencyError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, String>,
    {
        let now = self.clock.now();
        let Some(record) = self.store.get(key)? else {
            // The record was claimed a moment ago and is already gone
            // (released or reclaimed mid-read).
            return Err(in_progress(key));
        };

        if record.status == RecordStatus::Completed && !record.is_expired(now) {
            let data = record.data.as_deref().ok_or_else(|| {
                IdempotencyError::CorruptStoredResult {
                    key: key.to_string(),
                    message: "data attribute is absent".to_string(),
                }
            })?;
            let result = serde_json::from_str(data).map_err(|error| {
                IdempotencyError::CorruptStoredResult {
                    key: key.to_string(),
                    message: error.to_string(),
                }
            })?;
            log_event("cached_result_returned", json!({ "key": key }));
            return Ok(Execution::Cached(result));
        }

        if record.lock_expired(now) {
            // Retry the claim exactly once: another caller may be racing for
            // the abandoned lock at this very moment.
            return match self.store.claim(
                key,
                now,
                self.config.lock_ttl,
                self.config.result_ttl,
            ) {
                Ok(claim) => {
                    log_event("lock_reclaimed", json!({ "key": key }));
                    self.run_claimed(key, claim, work)
                }
                Err(error) if error.is_conflict() => Err(in_progress(key)),
                Err(error) => Err(error.into()),
            };
        }

        Err(in_progress(key))
    }
}

fn in_progress(key: &str) -> IdempotencyError {
    log_event("in_progress_conflict", json!({ "key": key }));
    IdempotencyError::InProgress {
        key: key.to_string(),
    }
}

fn log_event(event: &str, details: serde_json::Value) {
    eprintln!(
        "{}",
        json!({
            "component": "idempotency",
            "event": event,
            "timestamp": Utc::now().to_rfc3339(),
            "details": details,
        })
    );
}

fn log_error(event: &str, details: serde_json::Value) {
    eprintln!(
        "{}",
        json!({
            "component": "idempotency",
            "level": "error",
            "event": event,
            "timestamp": Utc::now().to_rfc3339(),
            "details": details,
        })
    );
}
