//! In-memory document store.
//!
//! [`InMemoryStore`] provides a thread-safe [`DocumentStore`] implementation
//! using `DashMap<TaskKey, (TaskRecord, u64)>`. It is a dumb store with no
//! domain logic and is immediately consistent: every committed write is
//! visible to the next read.
//!
//! # Concurrency
//!
//! `DashMap` gives shard-level locking. `put_if_version` holds the entry's
//! shard lock across the version check and the write, so compare-and-swap
//! is atomic. Batches are applied record by record; a concurrent reader may
//! observe part of a batch.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use docqueue::store::memory::InMemoryStore;
//! use docqueue::TaskController;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let controller = TaskController::new(store.clone(), "job");
//! assert_eq!(controller.job_name(), "job");
//! assert!(store.is_empty());
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};

use crate::constants::MAX_BATCH_SIZE;
use crate::domain::{TaskKey, TaskRecord, VersionedTask};
use crate::store::backend::{
    check_batch_size, DocumentStore, SortOrder, StorageError, TaskQuery,
};

/// Thread-safe in-memory store using [`DashMap`].
///
/// Records are stored with a monotonic version number starting at 1.
/// Keys are random `UUIDv4` strings assigned by [`put_batch`](DocumentStore::put_batch).
#[derive(Debug)]
pub struct InMemoryStore {
    data: DashMap<TaskKey, (TaskRecord, u64)>,
    max_batch_size: usize,
}

impl InMemoryStore {
    /// Creates an empty store accepting batches of up to 250 records.
    ///
    /// # Examples
    ///
    /// ```
    /// use docqueue::store::memory::InMemoryStore;
    ///
    /// let store = InMemoryStore::new();
    /// assert_eq!(store.len(), 0);
    /// ```
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            max_batch_size: MAX_BATCH_SIZE,
        }
    }

    /// Overrides the batch size limit.
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    /// Returns the number of records stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the store contains no records.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn snapshot(&self, query: &TaskQuery) -> Vec<VersionedTask> {
        let mut matched: Vec<VersionedTask> = self
            .data
            .iter()
            .filter(|entry| query.matches(&entry.value().0))
            .map(|entry| {
                let (record, version) = entry.value();
                VersionedTask {
                    key: entry.key().clone(),
                    record: record.clone(),
                    version: *version,
                }
            })
            .collect();

        match query.order {
            Some(SortOrder::CreatedAscending) => matched.sort_by(|a, b| {
                a.record
                    .creation_epoch_ms
                    .cmp(&b.record.creation_epoch_ms)
                    .then_with(|| a.key.cmp(&b.key))
            }),
            Some(SortOrder::CreatedDescending) => matched.sort_by(|a, b| {
                b.record
                    .creation_epoch_ms
                    .cmp(&a.record.creation_epoch_ms)
                    .then_with(|| a.key.cmp(&b.key))
            }),
            None => matched.sort_by(|a, b| a.key.cmp(&b.key)),
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        matched
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, key: &TaskKey) -> Result<VersionedTask, StorageError> {
        let entry = self.data.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        let (record, version) = entry.value();
        Ok(VersionedTask {
            key: key.clone(),
            record: record.clone(),
            version: *version,
        })
    }

    async fn put(&self, key: &TaskKey, record: &TaskRecord) -> Result<u64, StorageError> {
        let mut entry = self
            .data
            .entry(key.clone())
            .or_insert_with(|| (record.clone(), 0));
        let new_version = entry.value().1 + 1;
        *entry.value_mut() = (record.clone(), new_version);
        Ok(new_version)
    }

    async fn put_if_version(
        &self,
        key: &TaskKey,
        record: &TaskRecord,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let mut entry = self
            .data
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;
        let current_version = entry.value().1;
        if current_version != expected_version {
            return Err(StorageError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: current_version,
            });
        }
        let new_version = current_version + 1;
        *entry.value_mut() = (record.clone(), new_version);
        Ok(new_version)
    }

    async fn put_batch(&self, records: &[TaskRecord]) -> Result<Vec<TaskKey>, StorageError> {
        check_batch_size(records.len(), self.max_batch_size)?;
        let keys: Vec<TaskKey> = records
            .iter()
            .map(|record| {
                let key = TaskKey::generate();
                self.data.insert(key.clone(), (record.clone(), 1));
                key
            })
            .collect();
        Ok(keys)
    }

    async fn delete_batch(&self, keys: &[TaskKey]) -> Result<usize, StorageError> {
        check_batch_size(keys.len(), self.max_batch_size)?;
        Ok(keys
            .iter()
            .filter(|key| self.data.remove(*key).is_some())
            .count())
    }

    fn query(&self, query: TaskQuery) -> BoxStream<'_, Result<VersionedTask, StorageError>> {
        let matched = self.snapshot(&query);
        stream::iter(matched.into_iter().map(Ok)).boxed()
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}
