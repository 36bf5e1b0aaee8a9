use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::record::{Claim, IdempotencyRecord, RecordStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The conditional write was rejected. This is an expected protocol
    /// branch (live lock or valid cached result), not an infrastructure
    /// failure.
    #[error("conditional write rejected for key {key}")]
    Conflict { key: String },

    #[error("stored record for key {key} is malformed: {message}")]
    Malformed { key: String, message: String },

    #[error("record store request failed: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Protocol-level client over the backing store.
///
/// Every operation is a single atomic request; claim, complete, and release
/// preconditions are evaluated server-side, never as read-then-write.
pub trait RecordStore: Send + Sync {
    /// Insert a new INPROGRESS record for `key`. Succeeds only if no record
    /// exists, the existing record's `expiration` has passed, or the
    /// existing INPROGRESS lock's `in_progress_expiration` has passed.
    fn claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        lock_ttl: Duration,
        result_ttl: Duration,
    ) -> Result<Claim, StoreError>;

    /// Transition the caller's INPROGRESS record to COMPLETED with the
    /// serialized result, conditioned on the caller's claim still being the
    /// current generation.
    fn complete(
        &self,
        key: &str,
        claim: &Claim,
        data: &str,
        now: DateTime<Utc>,
        result_ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Delete the caller's own INPROGRESS record so a failed execution does
    /// not hold the lock for the remainder of its TTL.
    fn release(&self, key: &str, claim: &Claim) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError>;
}

pub fn lock_deadline_millis(now: DateTime<Utc>, lock_ttl: Duration) -> i64 {
    now.timestamp_millis() + lock_ttl.as_millis() as i64
}

pub fn result_deadline_seconds(now: DateTime<Utc>, result_ttl: Duration) -> i64 {
    now.timestamp() + result_ttl.as_secs() as i64
}

/// In-memory store evaluating the same claim precondition as the DynamoDB
/// implementation. Backs local runs and protocol tests.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<String, IdempotencyRecord>>, StoreError> {
        self.records.lock().map_err(|_| StoreError::Unavailable {
            message: "record store mutex poisoned".to_string(),
        })
    }

    fn owns(record: &IdempotencyRecord, claim: &Claim) -> bool {
        record.status == RecordStatus::InProgress
            && record.in_progress_expiration == Some(claim.in_progress_expiration)
    }
}

impl RecordStore for MemoryRecordStore {
    fn claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        lock_ttl: Duration,
        result_ttl: Duration,
    ) -> Result<Claim, StoreError> {
        let mut records = self.records()?;

        let claimable = match records.get(key) {
            None => true,
            Some(existing) => existing.is_expired(now) || existing.lock_expired(now),
        };
        if !claimable {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        let claim = Claim {
            in_progress_expiration: lock_deadline_millis(now, lock_ttl),
        };
        records.insert(
            key.to_string(),
            IdempotencyRecord {
                id: key.to_string(),
                status: RecordStatus::InProgress,
                expiration: result_deadline_seconds(now, result_ttl),
                in_progress_expiration: Some(claim.in_progress_expiration),
                data: None,
            },
        );
        Ok(claim)
    }

    fn complete(
        &self,
        key: &str,
        claim: &Claim,
        data: &str,
        now: DateTime<Utc>,
        result_ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut records = self.records()?;

        let Some(existing) = records.get_mut(key) else {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        };
        if !Self::owns(existing, claim) {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        existing.status = RecordStatus::Completed;
        existing.data = Some(data.to_string());
        existing.expiration = result_deadline_seconds(now, result_ttl);
        Ok(())
    }

    fn release(&self, key: &str, claim: &Claim) -> Result<(), StoreError> {
        let mut records = self.records()?;

        let owns = records
            .get(key)
            .map(|existing| Self::owns(existing, claim))
            .unwrap_or(false);
        if !owns {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        records.remove(key);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.records()?.get(key).cloned())
    }
}
