use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Attribute names are shared with records already stored by earlier
// deployments and must match exactly.
pub const ATTR_ID: &str = "id";
pub const ATTR_STATUS: &str = "status";
pub const ATTR_EXPIRATION: &str = "expiration";
pub const ATTR_IN_PROGRESS_EXPIRATION: &str = "in_progress_expiration";
pub const ATTR_DATA: &str = "data";

/// Stored record status. Expiry is a derived condition, never a stored
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    #[serde(rename = "INPROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETED")]
    Completed,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "INPROGRESS",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INPROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Proof of a won claim.
///
/// The `in_progress_expiration` value written by the winning conditional
/// insert doubles as the generation marker: complete and release are
/// conditioned on it still being in place, so a lock reclaimed by another
/// caller rejects the stale owner's writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub in_progress_expiration: i64,
}

/// One idempotency record per derived key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub id: String,
    pub status: RecordStatus,
    /// Staleness boundary for a COMPLETED record, epoch seconds.
    pub expiration: i64,
    /// Staleness boundary for an INPROGRESS lock, epoch milliseconds.
    pub in_progress_expiration: Option<i64>,
    /// Serialized result payload, present only once COMPLETED.
    pub data: Option<String>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration < now.timestamp()
    }

    /// An INPROGRESS lock whose deadline has passed is considered abandoned
    /// and eligible for reclaim. A lock without a recorded deadline is never
    /// treated as abandoned.
    pub fn lock_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == RecordStatus::InProgress
            && self
                .in_progress_expiration
                .map(|deadline| deadline < now.timestamp_millis())
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(epoch_seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(epoch_seconds, 0).expect("timestamp should be valid")
    }

    fn completed_record(expiration: i64) -> IdempotencyRecord {
        IdempotencyRecord {
            id: "fn.handler#abc123".to_string(),
            status: RecordStatus::Completed,
            expiration,
            in_progress_expiration: None,
            data: Some("{}".to_string()),
        }
    }

    #[test]
    fn completed_record_expires_after_expiration() {
        let record = completed_record(1_000);

        assert!(!record.is_expired(instant(999)));
        assert!(!record.is_expired(instant(1_000)));
        assert!(record.is_expired(instant(1_001)));
    }

    #[test]
    fn lock_expiry_requires_in_progress_status_and_deadline() {
        let mut record = IdempotencyRecord {
            id: "fn.handler#abc123".to_string(),
            status: RecordStatus::InProgress,
            expiration: 10_000,
            in_progress_expiration: Some(5_000_000),
            data: None,
        };

        assert!(!record.lock_expired(instant(4_999)));
        assert!(record.lock_expired(instant(5_001)));

        record.in_progress_expiration = None;
        assert!(!record.lock_expired(instant(5_001)));

        record.in_progress_expiration = Some(5_000_000);
        record.status = RecordStatus::Completed;
        assert!(!record.lock_expired(instant(5_001)));
    }

    #[test]
    fn status_round_trips_through_wire_strings() {
        assert_eq!(
            RecordStatus::parse(RecordStatus::InProgress.as_str()),
            Some(RecordStatus::InProgress)
        );
        assert_eq!(
            RecordStatus::parse(RecordStatus::Completed.as_str()),
            Some(RecordStatus::Completed)
        );
        assert_eq!(RecordStatus::parse("EXPIRED"), None);
    }
}
