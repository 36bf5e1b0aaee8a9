use std::collections::HashMap;
use std::time::Duration;

use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::delete_item::DeleteItemError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use idempotency_core::record::{
    Claim, IdempotencyRecord, RecordStatus, ATTR_DATA, ATTR_EXPIRATION, ATTR_ID,
    ATTR_IN_PROGRESS_EXPIRATION, ATTR_STATUS,
};
use idempotency_core::store::{
    lock_deadline_millis, result_deadline_seconds, RecordStore, StoreError,
};

// Wire expressions shared with records stored by existing deployments. The
// claim precondition is evaluated server-side as a single atomic check: no
// record, a stale completed record, or an abandoned in-progress lock.
const CLAIM_CONDITION: &str = "attribute_not_exists(#id) OR #expiry < :now OR \
    (#status = :inprogress AND attribute_exists(#in_progress_expiry) AND #in_progress_expiry < :now_in_millis)";

const COMPLETE_UPDATE: &str =
    "SET #response_data = :response_data, #expiry = :expiry, #status = :status";

// Complete and release only proceed while the caller's own generation is
// still in place.
const OWNERSHIP_CONDITION: &str = "#status = :inprogress AND #in_progress_expiry = :claimed";

/// DynamoDB-backed record store.
///
/// Implements the synchronous store seam by bridging onto the ambient Tokio
/// runtime, so the protocol core stays runtime-free.
pub struct DynamoRecordStore {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
}

impl DynamoRecordStore {
    pub fn new(client: aws_sdk_dynamodb::Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

fn claim_item(
    key: &str,
    now: DateTime<Utc>,
    lock_ttl: Duration,
    result_ttl: Duration,
) -> HashMap<String, AttributeValue> {
    HashMap::from([
        (ATTR_ID.to_string(), AttributeValue::S(key.to_string())),
        (
            ATTR_STATUS.to_string(),
            AttributeValue::S(RecordStatus::InProgress.as_str().to_string()),
        ),
        (
            ATTR_EXPIRATION.to_string(),
            AttributeValue::N(result_deadline_seconds(now, result_ttl).to_string()),
        ),
        (
            ATTR_IN_PROGRESS_EXPIRATION.to_string(),
            AttributeValue::N(lock_deadline_millis(now, lock_ttl).to_string()),
        ),
    ])
}

fn item_to_record(
    key: &str,
    item: &HashMap<String, AttributeValue>,
) -> Result<IdempotencyRecord, StoreError> {
    let malformed = |message: String| StoreError::Malformed {
        key: key.to_string(),
        message,
    };

    let status_raw = item
        .get(ATTR_STATUS)
        .and_then(|value| value.as_s().ok())
        .ok_or_else(|| malformed("status attribute is absent or not a string".to_string()))?;
    let status = RecordStatus::parse(status_raw)
        .ok_or_else(|| malformed(format!("unknown status {status_raw:?}")))?;

    let expiration = item
        .get(ATTR_EXPIRATION)
        .and_then(|value| value.as_n().ok())
        .and_then(|value| value.parse::<i64>().ok())
        .ok_or_else(|| malformed("expiration attribute is absent or not a number".to_string()))?;

    let in_progress_expiration = match item.get(ATTR_IN_PROGRESS_EXPIRATION) {
        None => None,
        Some(value) => Some(
            value
                .as_n()
                .ok()
                .and_then(|value| value.parse::<i64>().ok())
                .ok_or_else(|| {
                    malformed("in_progress_expiration attribute is not a number".to_string())
                })?,
        ),
    };

    let data = item
        .get(ATTR_DATA)
        .and_then(|value| value.as_s().ok())
        .cloned();

    let id = item
        .get(ATTR_ID)
        .and_then(|value| value.as_s().ok())
        .cloned()
        .unwrap_or_else(|| key.to_string());

    Ok(IdempotencyRecord {
        id,
        status,
        expiration,
        in_progress_expiration,
        data,
    })
}

fn is_put_conditional_check_failed(error: &SdkError<PutItemError>) -> bool {
    match error {
        SdkError::ServiceError(service_error) => matches!(
            service_error.err(),
            PutItemError::ConditionalCheckFailedException(_)
        ),
        _ => false,
    }
}

fn is_update_conditional_check_failed(error: &SdkError<UpdateItemError>) -> bool {
    match error {
        SdkError::ServiceError(service_error) => matches!(
            service_error.err(),
            UpdateItemError::ConditionalCheckFailedException(_)
        ),
        _ => false,
    }
}

fn is_delete_conditional_check_failed(error: &SdkError<DeleteItemError>) -> bool {
    match error {
        SdkError::ServiceError(service_error) => matches!(
            service_error.err(),
            DeleteItemError::ConditionalCheckFailedException(_)
        ),
        _ => false,
    }
}

impl RecordStore for DynamoRecordStore {
    fn claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        lock_ttl: Duration,
        result_ttl: Duration,
    ) -> Result<Claim, StoreError> {
        let claim = Claim {
            in_progress_expiration: lock_deadline_millis(now, lock_ttl),
        };
        let item = claim_item(key, now, lock_ttl, result_ttl);
        let client = self.client.clone();
        let table_name = self.table_name.clone();

        let result = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .put_item()
                    .table_name(table_name)
                    .set_item(Some(item))
                    .condition_expression(CLAIM_CONDITION)
                    .expression_attribute_names("#id", ATTR_ID)
                    .expression_attribute_names("#expiry", ATTR_EXPIRATION)
                    .expression_attribute_names("#status", ATTR_STATUS)
                    .expression_attribute_names("#in_progress_expiry", ATTR_IN_PROGRESS_EXPIRATION)
                    .expression_attribute_values(
                        ":now",
                        AttributeValue::N(now.timestamp().to_string()),
                    )
                    .expression_attribute_values(
                        ":now_in_millis",
                        AttributeValue::N(now.timestamp_millis().to_string()),
                    )
                    .expression_attribute_values(
                        ":inprogress",
                        AttributeValue::S(RecordStatus::InProgress.as_str().to_string()),
                    )
                    .send()
                    .await
            })
        });

        match result {
            Ok(_) => Ok(claim),
            Err(error) if is_put_conditional_check_failed(&error) => Err(StoreError::Conflict {
                key: key.to_string(),
            }),
            Err(error) => Err(StoreError::Unavailable {
                message: format!("dynamodb PutItem failed: {error}"),
            }),
        }
    }

    fn complete(
        &self,
        key: &str,
        claim: &Claim,
        data: &str,
        now: DateTime<Utc>,
        result_ttl: Duration,
    ) -> Result<(), StoreError> {
        let client = self.client.clone();
        let table_name = self.table_name.clone();
        let record_key = key.to_string();
        let response_data = data.to_string();
        let expiry = result_deadline_seconds(now, result_ttl);
        let claimed = claim.in_progress_expiration;

        let result = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .update_item()
                    .table_name(table_name)
                    .key(ATTR_ID, AttributeValue::S(record_key))
                    .update_expression(COMPLETE_UPDATE)
                    .condition_expression(OWNERSHIP_CONDITION)
                    .expression_attribute_names("#response_data", ATTR_DATA)
                    .expression_attribute_names("#expiry", ATTR_EXPIRATION)
                    .expression_attribute_names("#status", ATTR_STATUS)
                    .expression_attribute_names("#in_progress_expiry", ATTR_IN_PROGRESS_EXPIRATION)
                    .expression_attribute_values(
                        ":response_data",
                        AttributeValue::S(response_data),
                    )
                    .expression_attribute_values(":expiry", AttributeValue::N(expiry.to_string()))
                    .expression_attribute_values(
                        ":status",
                        AttributeValue::S(RecordStatus::Completed.as_str().to_string()),
                    )
                    .expression_attribute_values(
                        ":inprogress",
                        AttributeValue::S(RecordStatus::InProgress.as_str().to_string()),
                    )
                    .expression_attribute_values(
                        ":claimed",
                        AttributeValue::N(claimed.to_string()),
                    )
                    .send()
                    .await
            })
        });

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_update_conditional_check_failed(&error) => {
                Err(StoreError::Conflict {
                    key: key.to_string(),
                })
            }
            Err(error) => Err(StoreError::Unavailable {
                message: format!("dynamodb UpdateItem failed: {error}"),
            }),
        }
    }

    fn release(&self, key: &str, claim: &Claim) -> Result<(), StoreError> {
        let client = self.client.clone();
        let table_name = self.table_name.clone();
        let record_key = key.to_string();
        let claimed = claim.in_progress_expiration;

        let result = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .delete_item()
                    .table_name(table_name)
                    .key(ATTR_ID, AttributeValue::S(record_key))
                    .condition_expression(OWNERSHIP_CONDITION)
                    .expression_attribute_names("#status", ATTR_STATUS)
                    .expression_attribute_names("#in_progress_expiry", ATTR_IN_PROGRESS_EXPIRATION)
                    .expression_attribute_values(
                        ":inprogress",
                        AttributeValue::S(RecordStatus::InProgress.as_str().to_string()),
                    )
                    .expression_attribute_values(
                        ":claimed",
                        AttributeValue::N(claimed.to_string()),
                    )
                    .send()
                    .await
            })
        });

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_delete_conditional_check_failed(&error) => {
                Err(StoreError::Conflict {
                    key: key.to_string(),
                })
            }
            Err(error) => Err(StoreError::Unavailable {
                message: format!("dynamodb DeleteItem failed: {error}"),
            }),
        }
    }

    fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        let client = self.client.clone();
        let table_name = self.table_name.clone();
        let record_key = key.to_string();

        let result = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .get_item()
                    .table_name(table_name)
                    .key(ATTR_ID, AttributeValue::S(record_key))
                    .consistent_read(true)
                    .send()
                    .await
            })
        });

        let response = result.map_err(|error| StoreError::Unavailable {
            message: format!("dynamodb GetItem failed: {error}"),
        })?;

        response
            .item()
            .map(|item| item_to_record(key, item))
            .transpose()
    }
}
