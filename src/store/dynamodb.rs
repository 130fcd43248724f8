//! `DynamoDB` document store.
//!
//! [`DynamoDbStore`] implements [`DocumentStore`] on a single `DynamoDB`
//! table: `GetItem`, `UpdateItem` for upserts (the version is incremented
//! atomically with `ADD`), `PutItem` with a `ConditionExpression` for
//! versioned writes, `BatchWriteItem` for batched inserts and deletes, and
//! `Query` or `Scan` for streamed queries.
//!
//! # Table Layout
//!
//! | Attribute           | Type   | Description                               |
//! |---------------------|--------|-------------------------------------------|
//! | `PK`                | String | Partition key: the task key (`UUIDv4`)    |
//! | `jobName`           | String | Job the task belongs to                   |
//! | `lifecycleState`    | Number | State ordinal (0 = ready ... 4 = dead)    |
//! | `ownerID`           | String | Owner ID, empty when unallocated          |
//! | `creationEpochMs`   | Number | Creation time, epoch milliseconds         |
//! | `lastUpdateEpochMs` | Number | Last state change or heartbeat            |
//! | `failureCount`      | Number | Failed processing attempts                |
//! | `inputBlob`         | Binary | Compressed input                          |
//! | `outputBlob`        | Binary | Compressed result, empty until written    |
//! | `sourceBlob`        | Binary | Compressed source map                     |
//! | `version`           | Number | Monotonic write version (starts at 1)     |
//!
//! Ordered queries filtered by state use a global secondary index with
//! `lifecycleState` as partition key and `creationEpochMs` as sort key,
//! projecting all attributes. Any other query is a filtered `Scan`.
//!
//! # Consistency
//!
//! Reads are eventually consistent unless
//! [`with_consistent_reads`](DynamoDbStore::with_consistent_reads) is set.
//! Index queries are always eventually consistent.
//!
//! # Batches
//!
//! `BatchWriteItem` accepts 25 requests, so a batch of up to 250 records is
//! sent as several chunks. Each chunk is atomic on its own; a failure part
//! way through leaves the earlier chunks committed. Unprocessed items are
//! resent a bounded number of times before the batch fails.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docqueue::store::dynamodb::DynamoDbStore;
//! use docqueue::TaskController;
//!
//! # async fn example() {
//! let store = DynamoDbStore::from_env_with_table("nightly_tasks").await;
//! let controller = TaskController::new(Arc::new(store), "nightly");
//! # }
//! ```

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeValue, DeleteRequest, PutRequest, ReturnValue, ReturnValuesOnConditionCheckFailure,
    WriteRequest,
};
use aws_sdk_dynamodb::Client;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::constants::MAX_BATCH_SIZE;
use crate::domain::{TaskKey, TaskRecord, VersionedTask};
use crate::store::backend::{
    check_batch_size, DocumentStore, SortOrder, StorageError, TaskQuery,
};
use crate::types::LifecycleState;

/// Default table name used by [`DynamoDbStore::from_env`].
pub const DEFAULT_TABLE_NAME: &str = "docqueue_tasks";

/// Default name of the `lifecycleState`/`creationEpochMs` index.
pub const DEFAULT_STATE_INDEX: &str = "lifecycleState-creationEpochMs-index";

/// `BatchWriteItem` request limit.
const DYNAMODB_BATCH_LIMIT: usize = 25;

/// Times unprocessed batch items are resent before giving up.
const UNPROCESSED_RETRIES: u32 = 5;

/// Base delay between unprocessed-item resends, doubled per retry.
const UNPROCESSED_BACKOFF: Duration = Duration::from_millis(50);

const ATTR_KEY: &str = "PK";
const ATTR_JOB: &str = "jobName";
const ATTR_STATE: &str = "lifecycleState";
const ATTR_OWNER: &str = "ownerID";
const ATTR_CREATED: &str = "creationEpochMs";
const ATTR_UPDATED: &str = "lastUpdateEpochMs";
const ATTR_FAILURES: &str = "failureCount";
const ATTR_INPUT: &str = "inputBlob";
const ATTR_OUTPUT: &str = "outputBlob";
const ATTR_SOURCES: &str = "sourceBlob";
const ATTR_VERSION: &str = "version";

type Item = HashMap<String, AttributeValue>;

/// `DynamoDB` document store for task records.
///
/// A thin adapter with no domain logic: records are stored attribute by
/// attribute and returned verbatim.
///
/// # Examples
///
/// ```rust,no_run
/// use docqueue::store::dynamodb::DynamoDbStore;
///
/// # async fn example() {
/// let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
/// let client = aws_sdk_dynamodb::Client::new(&config);
/// let store = DynamoDbStore::new(client, "my_tasks")
///     .with_state_index("by-state")
///     .with_consistent_reads(true);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DynamoDbStore {
    client: Client,
    table_name: String,
    state_index: Option<String>,
    consistent_reads: bool,
}

impl DynamoDbStore {
    /// Creates a store with a pre-built client.
    ///
    /// The table must already exist with `PK` (String) as its partition
    /// key. The state index defaults to [`DEFAULT_STATE_INDEX`].
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            state_index: Some(DEFAULT_STATE_INDEX.to_string()),
            consistent_reads: false,
        }
    }

    /// Creates a store using the standard AWS SDK config chain and
    /// [`DEFAULT_TABLE_NAME`].
    pub async fn from_env() -> Self {
        Self::from_env_with_table(DEFAULT_TABLE_NAME).await
    }

    /// Creates a store from the standard AWS SDK config chain with a custom
    /// table name.
    pub async fn from_env_with_table(table_name: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);
        Self::new(client, table_name)
    }

    /// Sets the name of the `lifecycleState`/`creationEpochMs` index.
    pub fn with_state_index(mut self, index_name: impl Into<String>) -> Self {
        self.state_index = Some(index_name.into());
        self
    }

    /// Disables the state index; ordered queries fall back to a full scan
    /// sorted client-side.
    pub fn without_state_index(mut self) -> Self {
        self.state_index = None;
        self
    }

    /// Requests strongly consistent reads for `GetItem` and `Scan`.
    pub fn with_consistent_reads(mut self, consistent: bool) -> Self {
        self.consistent_reads = consistent;
        self
    }

    /// Returns the table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn fetch_page(
        &self,
        query: &TaskQuery,
        cursor: Cursor,
    ) -> Result<Option<(Vec<VersionedTask>, Cursor)>, StorageError> {
        let start_key = match cursor {
            Cursor::Start => None,
            Cursor::After(key) => Some(key),
            Cursor::Done => return Ok(None),
        };

        let (items, last_key) = match (self.index_for(query), query.state) {
            (Some(index), Some(state)) => {
                let mut filter = Filter::default();
                filter.push_job(query.job_name.as_deref());
                let mut names = filter.names;
                let mut values = filter.values;
                names.insert("#state".to_string(), ATTR_STATE.to_string());
                values.insert(
                    ":state".to_string(),
                    AttributeValue::N(state.ordinal().to_string()),
                );

                let output = self
                    .client
                    .query()
                    .table_name(&self.table_name)
                    .index_name(index)
                    .key_condition_expression("#state = :state")
                    .set_filter_expression(filter.expression)
                    .set_expression_attribute_names(Some(names))
                    .set_expression_attribute_values(Some(values))
                    .scan_index_forward(query.order == Some(SortOrder::CreatedAscending))
                    .set_exclusive_start_key(start_key)
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, &self.table_name))?;
                (
                    output.items().to_vec(),
                    output.last_evaluated_key().cloned(),
                )
            },
            _ => {
                let mut filter = Filter::default();
                filter.push_job(query.job_name.as_deref());
                filter.push_state(query.state);

                let output = self
                    .client
                    .scan()
                    .table_name(&self.table_name)
                    .consistent_read(self.consistent_reads)
                    .set_filter_expression(filter.expression)
                    .set_expression_attribute_names(non_empty(filter.names))
                    .set_expression_attribute_values(non_empty(filter.values))
                    .set_exclusive_start_key(start_key)
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, &self.table_name))?;
                (
                    output.items().to_vec(),
                    output.last_evaluated_key().cloned(),
                )
            },
        };

        let page = items
            .iter()
            .map(from_item)
            .collect::<Result<Vec<_>, _>>()?;
        let next = match last_key {
            Some(key) if !key.is_empty() => Cursor::After(key),
            _ => Cursor::Done,
        };
        Ok(Some((page, next)))
    }

    fn index_for(&self, query: &TaskQuery) -> Option<&str> {
        match (query.order, query.state) {
            (Some(_), Some(_)) => self.state_index.as_deref(),
            _ => None,
        }
    }

    fn pages(&self, query: TaskQuery) -> BoxStream<'_, Result<VersionedTask, StorageError>> {
        stream::try_unfold(Cursor::Start, move |cursor| {
            let query = query.clone();
            async move { self.fetch_page(&query, cursor).await }
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, StorageError>)))
        .try_flatten()
        .boxed()
    }

    async fn write_chunk(&self, requests: Vec<WriteRequest>) -> Result<(), StorageError> {
        let mut pending = requests;
        let mut retries = 0;
        loop {
            let output = self
                .client
                .batch_write_item()
                .request_items(&self.table_name, pending)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &self.table_name))?;

            pending = output
                .unprocessed_items()
                .and_then(|items| items.get(&self.table_name))
                .cloned()
                .unwrap_or_default();
            if pending.is_empty() {
                return Ok(());
            }
            if retries == UNPROCESSED_RETRIES {
                return Err(StorageError::Backend {
                    message: format!(
                        "{} batch items still unprocessed after {retries} retries",
                        pending.len()
                    ),
                    source: None,
                });
            }
            retries += 1;
            tracing::debug!(
                table = %self.table_name,
                unprocessed = pending.len(),
                retry = retries,
                "resending unprocessed batch items"
            );
            tokio::time::sleep(UNPROCESSED_BACKOFF * 2u32.pow(retries - 1)).await;
        }
    }
}

enum Cursor {
    Start,
    After(Item),
    Done,
}

/// Filter expression under construction.
#[derive(Default)]
struct Filter {
    expression: Option<String>,
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl Filter {
    fn push(&mut self, clause: &str) {
        self.expression = Some(match self.expression.take() {
            Some(existing) => format!("{existing} AND {clause}"),
            None => clause.to_string(),
        });
    }

    fn push_job(&mut self, job_name: Option<&str>) {
        if let Some(job) = job_name {
            self.push("#job = :job");
            self.names.insert("#job".to_string(), ATTR_JOB.to_string());
            self.values
                .insert(":job".to_string(), AttributeValue::S(job.to_string()));
        }
    }

    fn push_state(&mut self, state: Option<LifecycleState>) {
        if let Some(state) = state {
            self.push("#state = :state");
            self.names.insert("#state".to_string(), ATTR_STATE.to_string());
            self.values.insert(
                ":state".to_string(),
                AttributeValue::N(state.ordinal().to_string()),
            );
        }
    }
}

// DynamoDB rejects empty expression attribute maps.
fn non_empty<V>(map: HashMap<String, V>) -> Option<HashMap<String, V>> {
    (!map.is_empty()).then_some(map)
}

// ---------------------------------------------------------------------------
// Item conversion
// ---------------------------------------------------------------------------

fn to_item(key: &TaskKey, record: &TaskRecord, version: u64) -> Item {
    let mut item: Item = record_attrs(record)
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    item.insert(ATTR_KEY.to_string(), AttributeValue::S(key.to_string()));
    item.insert(ATTR_VERSION.to_string(), AttributeValue::N(version.to_string()));
    item
}

/// Every record attribute except the key and the version.
fn record_attrs(record: &TaskRecord) -> Vec<(&'static str, AttributeValue)> {
    vec![
        (ATTR_JOB, AttributeValue::S(record.job_name.clone())),
        (
            ATTR_STATE,
            AttributeValue::N(record.lifecycle_state.ordinal().to_string()),
        ),
        (ATTR_OWNER, AttributeValue::S(record.owner_id.clone())),
        (
            ATTR_CREATED,
            AttributeValue::N(record.creation_epoch_ms.to_string()),
        ),
        (
            ATTR_UPDATED,
            AttributeValue::N(record.last_update_epoch_ms.to_string()),
        ),
        (
            ATTR_FAILURES,
            AttributeValue::N(record.failure_count.to_string()),
        ),
        (ATTR_INPUT, AttributeValue::B(Blob::new(record.input_blob.clone()))),
        (ATTR_OUTPUT, AttributeValue::B(Blob::new(record.output_blob.clone()))),
        (ATTR_SOURCES, AttributeValue::B(Blob::new(record.source_blob.clone()))),
    ]
}

/// `UpdateItem` parts that overwrite every record attribute and increment
/// the version in the same request. A missing item is created at version 1.
struct Upsert {
    expression: String,
    names: HashMap<String, String>,
    values: Item,
}

impl Upsert {
    fn new(record: &TaskRecord) -> Self {
        let mut assignments = Vec::new();
        let mut names = HashMap::new();
        let mut values = HashMap::new();
        for (i, (name, value)) in record_attrs(record).into_iter().enumerate() {
            assignments.push(format!("#a{i} = :a{i}"));
            names.insert(format!("#a{i}"), name.to_string());
            values.insert(format!(":a{i}"), value);
        }
        names.insert("#v".to_string(), ATTR_VERSION.to_string());
        values.insert(":one".to_string(), AttributeValue::N("1".to_string()));

        Self {
            expression: format!("SET {} ADD #v :one", assignments.join(", ")),
            names,
            values,
        }
    }
}

fn from_item(item: &Item) -> Result<VersionedTask, StorageError> {
    let key = string_attr(item, ATTR_KEY, "?")?;
    let ordinal: u8 = number_attr(item, ATTR_STATE, &key)?;
    let lifecycle_state = LifecycleState::from_ordinal(ordinal).ok_or_else(|| {
        StorageError::backend(format!("unknown lifecycle state {ordinal} for key {key}"))
    })?;

    let record = TaskRecord {
        job_name: string_attr(item, ATTR_JOB, &key)?,
        lifecycle_state,
        owner_id: item
            .get(ATTR_OWNER)
            .and_then(|v| v.as_s().ok())
            .cloned()
            .unwrap_or_default(),
        creation_epoch_ms: number_attr(item, ATTR_CREATED, &key)?,
        last_update_epoch_ms: number_attr(item, ATTR_UPDATED, &key)?,
        failure_count: number_attr(item, ATTR_FAILURES, &key)?,
        input_blob: binary_attr(item, ATTR_INPUT),
        output_blob: binary_attr(item, ATTR_OUTPUT),
        source_blob: binary_attr(item, ATTR_SOURCES),
    };
    let version = number_attr(item, ATTR_VERSION, &key)?;

    Ok(VersionedTask {
        key: TaskKey::new(key),
        record,
        version,
    })
}

fn string_attr(item: &Item, name: &str, key: &str) -> Result<String, StorageError> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| {
            StorageError::backend(format!("missing or invalid {name} attribute for key {key}"))
        })
}

fn number_attr<T: FromStr>(item: &Item, name: &str, key: &str) -> Result<T, StorageError> {
    item.get(name)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<T>().ok())
        .ok_or_else(|| {
            StorageError::backend(format!("missing or invalid {name} attribute for key {key}"))
        })
}

// Absent binary attributes read as empty blobs.
fn binary_attr(item: &Item, name: &str) -> Vec<u8> {
    item.get(name)
        .and_then(|v| v.as_b().ok())
        .map(|b| b.as_ref().to_vec())
        .unwrap_or_default()
}

fn key_attr(key: &TaskKey) -> Item {
    HashMap::from([(ATTR_KEY.to_string(), AttributeValue::S(key.to_string()))])
}

/// Maps an AWS SDK error to a [`StorageError::Backend`].
fn map_sdk_error(err: impl std::error::Error + Send + Sync + 'static, key: &str) -> StorageError {
    StorageError::Backend {
        message: format!("DynamoDB error for {key}: {err}"),
        source: Some(Box::new(err)),
    }
}

// ---------------------------------------------------------------------------
// DocumentStore implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl DocumentStore for DynamoDbStore {
    async fn get(&self, key: &TaskKey) -> Result<VersionedTask, StorageError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(key_attr(key)))
            .consistent_read(self.consistent_reads)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key.as_str()))?;

        let item = result.item().ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        from_item(item)
    }

    async fn put(&self, key: &TaskKey, record: &TaskRecord) -> Result<u64, StorageError> {
        // The version is bumped server-side so concurrent writers never
        // reuse a number.
        let upsert = Upsert::new(record);
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(key_attr(key)))
            .update_expression(upsert.expression)
            .set_expression_attribute_names(Some(upsert.names))
            .set_expression_attribute_values(Some(upsert.values))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key.as_str()))?;

        let updated = result.attributes().ok_or_else(|| {
            StorageError::backend(format!("update of {key} returned no attributes"))
        })?;
        number_attr(updated, ATTR_VERSION, key.as_str())
    }

    async fn put_if_version(
        &self,
        key: &TaskKey,
        record: &TaskRecord,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let new_version = expected_version + 1;

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_item(key, record, new_version)))
            .condition_expression("attribute_exists(#pk) AND #v = :expected")
            .expression_attribute_names("#pk", ATTR_KEY)
            .expression_attribute_names("#v", ATTR_VERSION)
            .expression_attribute_values(
                ":expected",
                AttributeValue::N(expected_version.to_string()),
            )
            .return_values_on_condition_check_failure(ReturnValuesOnConditionCheckFailure::AllOld)
            .send()
            .await;

        match result {
            Ok(_) => Ok(new_version),
            Err(sdk_err) => match sdk_err.into_service_error() {
                // A failed check returns the stored item, if there is one.
                PutItemError::ConditionalCheckFailedException(conflict) => match conflict.item() {
                    Some(item) => Err(StorageError::VersionConflict {
                        key: key.to_string(),
                        expected: expected_version,
                        actual: number_attr(item, ATTR_VERSION, key.as_str())?,
                    }),
                    None => Err(StorageError::NotFound {
                        key: key.to_string(),
                    }),
                },
                other => Err(map_sdk_error(other, key.as_str())),
            },
        }
    }

    async fn put_batch(&self, records: &[TaskRecord]) -> Result<Vec<TaskKey>, StorageError> {
        check_batch_size(records.len(), MAX_BATCH_SIZE)?;
        let keys: Vec<TaskKey> = records.iter().map(|_| TaskKey::generate()).collect();

        for (chunk_keys, chunk_records) in keys
            .chunks(DYNAMODB_BATCH_LIMIT)
            .zip(records.chunks(DYNAMODB_BATCH_LIMIT))
        {
            let requests = chunk_keys
                .iter()
                .zip(chunk_records)
                .map(|(key, record)| -> Result<WriteRequest, StorageError> {
                    let put = PutRequest::builder()
                        .set_item(Some(to_item(key, record, 1)))
                        .build()
                        .map_err(|e| map_sdk_error(e, key.as_str()))?;
                    Ok(WriteRequest::builder().put_request(put).build())
                })
                .collect::<Result<Vec<_>, _>>()?;
            self.write_chunk(requests).await?;
        }
        Ok(keys)
    }

    /// Deletes records by key.
    ///
    /// `BatchWriteItem` does not report whether a deleted item existed, so
    /// the returned count is the number of delete requests committed.
    async fn delete_batch(&self, keys: &[TaskKey]) -> Result<usize, StorageError> {
        check_batch_size(keys.len(), MAX_BATCH_SIZE)?;

        for chunk in keys.chunks(DYNAMODB_BATCH_LIMIT) {
            let requests = chunk
                .iter()
                .map(|key| -> Result<WriteRequest, StorageError> {
                    let delete = DeleteRequest::builder()
                        .set_key(Some(key_attr(key)))
                        .build()
                        .map_err(|e| map_sdk_error(e, key.as_str()))?;
                    Ok(WriteRequest::builder().delete_request(delete).build())
                })
                .collect::<Result<Vec<_>, _>>()?;
            self.write_chunk(requests).await?;
        }
        Ok(keys.len())
    }

    fn query(&self, query: TaskQuery) -> BoxStream<'_, Result<VersionedTask, StorageError>> {
        let limit = query.limit.unwrap_or(usize::MAX);

        match query.order {
            // Without a usable index, ordering needs the full result set.
            Some(order) if self.index_for(&query).is_none() => {
                let pages = self.pages(query);
                stream::once(async move {
                    let mut all: Vec<VersionedTask> = pages.try_collect().await?;
                    all.sort_by_key(|task| task.record.creation_epoch_ms);
                    if order == SortOrder::CreatedDescending {
                        all.reverse();
                    }
                    all.truncate(limit);
                    Ok::<_, StorageError>(stream::iter(
                        all.into_iter().map(Ok::<_, StorageError>),
                    ))
                })
                .try_flatten()
                .boxed()
            },
            _ => self.pages(query).take(limit).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> TaskRecord {
        let mut record = TaskRecord::new_ready("job", 1_000, vec![1, 2], vec![3]);
        record.allocate_to("worker", 2_000);
        record.failure_count = 2;
        record
    }

    #[test]
    fn item_round_trip() {
        let key = TaskKey::new("k-1");
        let item = to_item(&key, &sample(), 7);
        let back = from_item(&item).unwrap();
        assert_eq!(back.key, key);
        assert_eq!(back.version, 7);
        assert_eq!(back.record, sample());
    }

    #[test]
    fn item_uses_store_attribute_names() {
        let item = to_item(&TaskKey::new("k"), &sample(), 1);
        let state = item.get("lifecycleState").and_then(|v| v.as_n().ok());
        assert_eq!(state.map(String::as_str), Some("1"));
        let owner = item.get("ownerID").and_then(|v| v.as_s().ok());
        assert_eq!(owner.map(String::as_str), Some("worker"));
        assert!(item.contains_key("creationEpochMs"));
    }

    #[test]
    fn missing_output_blob_reads_empty() {
        let mut item = to_item(&TaskKey::new("k"), &sample(), 1);
        item.remove(ATTR_OUTPUT);
        assert!(from_item(&item).unwrap().record.output_blob.is_empty());
    }

    #[test]
    fn unknown_state_ordinal_is_backend_error() {
        let mut item = to_item(&TaskKey::new("k"), &sample(), 1);
        item.insert(ATTR_STATE.to_string(), AttributeValue::N("9".to_string()));
        assert!(matches!(from_item(&item), Err(StorageError::Backend { .. })));
    }

    #[test]
    fn missing_version_is_backend_error() {
        let mut item = to_item(&TaskKey::new("k"), &sample(), 1);
        item.remove(ATTR_VERSION);
        let err = from_item(&item).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn upsert_sets_every_attribute_and_adds_version() {
        let upsert = Upsert::new(&sample());
        assert!(upsert.expression.starts_with("SET #a0 = :a0, "));
        assert!(upsert.expression.ends_with(" ADD #v :one"));
        assert_eq!(upsert.names.len(), 10);
        assert_eq!(upsert.values.len(), 10);
        assert_eq!(upsert.names.get("#v").map(String::as_str), Some(ATTR_VERSION));
        assert!(!upsert.names.values().any(|name| name == ATTR_KEY));

        let assigned: Vec<&str> = (0..9)
            .filter_map(|i| upsert.names.get(&format!("#a{i}")).map(String::as_str))
            .collect();
        assert!(assigned.contains(&ATTR_OUTPUT));
        assert!(assigned.contains(&ATTR_OWNER));
        assert_eq!(assigned.len(), 9);
    }

    #[test]
    fn filter_joins_clauses() {
        let mut filter = Filter::default();
        filter.push_job(Some("nightly"));
        filter.push_state(Some(LifecycleState::Done));
        assert_eq!(
            filter.expression.as_deref(),
            Some("#job = :job AND #state = :state")
        );
        assert_eq!(filter.names.len(), 2);
        assert!(non_empty(Filter::default().names).is_none());
    }
}
