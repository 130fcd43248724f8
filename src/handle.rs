//! Cached view over one task record.
//!
//! [`TaskHandle`] scopes all reads and writes to a single task key. It holds
//! a value snapshot of the record together with the time it was last synced
//! from the store, and decides per accessor whether that snapshot may be
//! served:
//!
//! - **Always refresh**: [`get_state`](TaskHandle::get_state),
//!   [`get_owner_id`](TaskHandle::get_owner_id) and every state-changing
//!   write. Allocation correctness depends on these never being stale.
//! - **Policy-based sync**: the remaining getters refresh only if the
//!   snapshot is missing or older than the staleness threshold (120 s by
//!   default).
//!
//! Every write replaces the snapshot with exactly what was written.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use docqueue::store::memory::InMemoryStore;
//! use docqueue::{DocumentStore, LifecycleState, SystemClock, TaskHandle, TaskRecord};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = Arc::new(InMemoryStore::new());
//! let keys = store
//!     .put_batch(&[TaskRecord::new_ready("job", 0, Vec::new(), Vec::new())])
//!     .await
//!     .unwrap();
//!
//! // A handle built from a bare key reads the store on first access.
//! let mut handle = TaskHandle::new(keys[0].clone(), store, Arc::new(SystemClock));
//! assert_eq!(handle.get_state().await.unwrap(), Some(LifecycleState::Ready));
//! assert_eq!(handle.get_failure_count().await.unwrap(), Some(0));
//! # });
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{duration_ms, Clock};
use crate::codec;
use crate::constants::STALENESS_THRESHOLD;
use crate::domain::{SourceMap, TaskKey, TaskRecord, VersionedTask};
use crate::error::TaskError;
use crate::store::{DocumentStore, StorageError};
use crate::types::LifecycleState;

/// A snapshot and the time it was taken. `entry` is `None` when the last
/// read found no record.
#[derive(Debug, Clone)]
struct Synced {
    entry: Option<VersionedTask>,
    synced_at_ms: i64,
}

/// In-process cached view over one task record.
///
/// Obtained from
/// [`TaskController::claim_next_ready_task`](crate::controller::TaskController::claim_next_ready_task)
/// or built directly from a key with [`TaskHandle::new`]. Operations on one
/// handle are sequential (`&mut self`); handles in different processes may
/// reference the same record concurrently, and the store stays the source
/// of truth.
///
/// # Missing Records
///
/// Read accessors return `Ok(None)` when the record no longer resolves.
/// Mutating accessors return [`TaskError::NotFound`] instead.
pub struct TaskHandle {
    key: TaskKey,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    staleness_threshold: Duration,
    synced: Option<Synced>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("key", &self.key)
            .field("staleness_threshold", &self.staleness_threshold)
            .field("synced", &self.synced)
            .finish_non_exhaustive()
    }
}

impl TaskHandle {
    /// Creates a lazy handle for `key`. The first access reads the store.
    pub fn new(key: TaskKey, store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            key,
            store,
            clock,
            staleness_threshold: STALENESS_THRESHOLD,
            synced: None,
        }
    }

    /// Creates a handle seeded with an already-fetched record, synced now.
    pub(crate) fn from_snapshot(
        task: VersionedTask,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        staleness_threshold: Duration,
    ) -> Self {
        let synced_at_ms = clock.now_epoch_ms();
        Self {
            key: task.key.clone(),
            store,
            clock,
            staleness_threshold,
            synced: Some(Synced {
                entry: Some(task),
                synced_at_ms,
            }),
        }
    }

    /// Overrides the staleness threshold for policy-based reads.
    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    /// Returns the key of the task this handle is scoped to.
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    /// Returns the cached snapshot without touching the store.
    ///
    /// `None` if the handle has never read the record or the last read
    /// found it missing.
    pub fn snapshot(&self) -> Option<&VersionedTask> {
        self.synced.as_ref().and_then(|s| s.entry.as_ref())
    }

    /// Re-reads the record unconditionally and resets the cache age.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the key no longer resolves; the cache
    ///   is left empty.
    /// - [`TaskError::StoreUnavailable`] on store failure.
    pub async fn refresh(&mut self) -> Result<&VersionedTask, TaskError> {
        let key = self.key.to_string();
        self.fetch()
            .await?
            .ok_or(TaskError::NotFound { key })
    }

    /// Returns the current lifecycle state. Always re-reads the store.
    pub async fn get_state(&mut self) -> Result<Option<LifecycleState>, TaskError> {
        Ok(self.fetch().await?.map(|t| t.record.lifecycle_state))
    }

    /// Returns the current owner ID (empty when unallocated). Always
    /// re-reads the store.
    pub async fn get_owner_id(&mut self) -> Result<Option<String>, TaskError> {
        Ok(self.fetch().await?.map(|t| t.record.owner_id.clone()))
    }

    /// Returns the number of failed processing attempts.
    pub async fn get_failure_count(&mut self) -> Result<Option<u32>, TaskError> {
        Ok(self.synced_record().await?.map(|r| r.failure_count))
    }

    /// Returns the time of the last state change or heartbeat.
    pub async fn get_last_update_epoch_ms(&mut self) -> Result<Option<i64>, TaskError> {
        Ok(self.synced_record().await?.map(|r| r.last_update_epoch_ms))
    }

    /// Returns the creation time.
    pub async fn get_creation_epoch_ms(&mut self) -> Result<Option<i64>, TaskError> {
        Ok(self.synced_record().await?.map(|r| r.creation_epoch_ms))
    }

    /// Returns the job name.
    pub async fn get_job_name(&mut self) -> Result<Option<String>, TaskError> {
        Ok(self.synced_record().await?.map(|r| r.job_name.clone()))
    }

    /// Returns the decoded task input.
    ///
    /// # Errors
    ///
    /// [`TaskError::Codec`] if the stored blob cannot be decoded.
    pub async fn get_input(&mut self) -> Result<Option<String>, TaskError> {
        match self.synced_record().await? {
            Some(record) => Ok(Some(codec::decode_text(&record.input_blob)?)),
            None => Ok(None),
        }
    }

    /// Returns the decoded source map.
    ///
    /// # Errors
    ///
    /// [`TaskError::Codec`] if the stored blob cannot be decoded.
    pub async fn get_source(&mut self) -> Result<Option<SourceMap>, TaskError> {
        match self.synced_record().await? {
            Some(record) => Ok(Some(codec::decode_sources(&record.source_blob)?)),
            None => Ok(None),
        }
    }

    /// Returns the decoded result, or `None` while no result has been
    /// written.
    ///
    /// # Errors
    ///
    /// [`TaskError::Codec`] if the stored blob cannot be decoded.
    pub async fn get_result(&mut self) -> Result<Option<String>, TaskError> {
        match self.synced_record().await? {
            Some(record) if !record.output_blob.is_empty() => {
                Ok(Some(codec::decode_text(&record.output_blob)?))
            },
            _ => Ok(None),
        }
    }

    /// Moves the task to `state`.
    ///
    /// `Allocated` is refused before any I/O: only the claim protocol may
    /// allocate a task. Otherwise the record is refreshed, the transition
    /// validated, and the new state written. Entering `Ready`, `Done` or
    /// `Dead` clears the owner.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidTransition`] for `Allocated` or any transition
    ///   the state machine forbids.
    /// - [`TaskError::NotFound`] if the record is gone.
    pub async fn set_state(&mut self, state: LifecycleState) -> Result<(), TaskError> {
        if state == LifecycleState::Allocated {
            return Err(TaskError::InvalidTransition {
                key: self.key.to_string(),
                from: None,
                to: state,
            });
        }

        let mut record = self.refresh().await?.record.clone();
        let from = record.lifecycle_state;
        from.validate_transition(self.key.as_str(), state)?;
        record.apply_state(state, self.clock.now_epoch_ms());
        self.write(record).await?;

        tracing::debug!(task_key = %self.key, %from, to = %state, "task state changed");
        Ok(())
    }

    /// Encodes `result` into the output blob and writes the record.
    ///
    /// Uses the cached snapshot without refreshing; the caller is expected
    /// to own the task. A handle that has never read the record reads it
    /// first. The write only lands if the stored version still matches the
    /// snapshot, so a deleted task is never recreated.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the record is gone.
    /// - [`TaskError::ConcurrentModification`] if someone else wrote the
    ///   record since the snapshot. The snapshot is dropped, so a retry
    ///   re-reads first.
    pub async fn set_result(&mut self, result: &str) -> Result<(), TaskError> {
        let output_blob = codec::encode_text(result)?;
        let (mut record, expected_version) = match self.snapshot() {
            Some(task) => (task.record.clone(), task.version),
            None => {
                let task = self.refresh().await?;
                (task.record.clone(), task.version)
            },
        };
        record.output_blob = output_blob;

        match self
            .store
            .put_if_version(&self.key, &record, expected_version)
            .await
        {
            Ok(version) => {
                self.cache(record, version);
                Ok(())
            },
            Err(e) => {
                if matches!(
                    e,
                    StorageError::NotFound { .. } | StorageError::VersionConflict { .. }
                ) {
                    self.synced = None;
                }
                Err(TaskError::from_storage(e, self.key.as_str()))
            },
        }
    }

    /// Refreshes, stamps the last-update time, and writes the record. A
    /// liveness heartbeat.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] if the record is gone.
    pub async fn record_progress(&mut self) -> Result<(), TaskError> {
        let mut record = self.refresh().await?.record.clone();
        record.last_update_epoch_ms = self.clock.now_epoch_ms();
        self.write(record).await?;
        Ok(())
    }

    /// Records a failed processing attempt and releases the task.
    ///
    /// Increments the failure count and moves the task back to `Ready` for
    /// another worker, or to `Dead` once the count reaches `max_failures`.
    /// Returns the state written.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidTransition`] unless the task is `Allocated` or
    ///   `Started`.
    /// - [`TaskError::NotFound`] if the record is gone.
    pub async fn record_failure(&mut self, max_failures: u32) -> Result<LifecycleState, TaskError> {
        let mut record = self.refresh().await?.record.clone();
        let from = record.lifecycle_state;
        if !from.holds_owner() {
            return Err(TaskError::InvalidTransition {
                key: self.key.to_string(),
                from: Some(from),
                to: LifecycleState::Ready,
            });
        }

        record.failure_count = record.failure_count.saturating_add(1);
        let next = if record.failure_count >= max_failures {
            LifecycleState::Dead
        } else {
            LifecycleState::Ready
        };
        from.validate_transition(self.key.as_str(), next)?;
        record.apply_state(next, self.clock.now_epoch_ms());
        let failures = record.failure_count;
        self.write(record).await?;

        tracing::warn!(
            task_key = %self.key,
            failure_count = failures,
            to = %next,
            "task attempt failed"
        );
        Ok(next)
    }

    /// Writes the cached record as allocated to `owner_id`, unconditionally.
    ///
    /// The snapshot is the candidate as returned by the claim query; it is
    /// not refreshed first.
    pub(crate) async fn write_claim(&mut self, owner_id: &str) -> Result<(), TaskError> {
        let mut record = match self.snapshot() {
            Some(task) => task.record.clone(),
            None => self.refresh().await?.record.clone(),
        };
        record.allocate_to(owner_id, self.clock.now_epoch_ms());
        self.write(record).await?;
        Ok(())
    }

    /// Writes the cached record as allocated to `owner_id` only if the
    /// stored version still matches the snapshot's. Returns `false` if the
    /// record changed or vanished in between.
    pub(crate) async fn write_claim_if_unchanged(
        &mut self,
        owner_id: &str,
    ) -> Result<bool, TaskError> {
        let Some(task) = self.snapshot() else {
            return Ok(false);
        };
        let expected_version = task.version;
        let mut record = task.record.clone();
        record.allocate_to(owner_id, self.clock.now_epoch_ms());

        match self
            .store
            .put_if_version(&self.key, &record, expected_version)
            .await
        {
            Ok(version) => {
                self.cache(record, version);
                Ok(true)
            },
            Err(StorageError::VersionConflict { .. } | StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(TaskError::from_storage(e, self.key.as_str())),
        }
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Reads the store and replaces the snapshot. `Ok(None)` if the record
    /// is missing.
    async fn fetch(&mut self) -> Result<Option<&VersionedTask>, TaskError> {
        let entry = match self.store.get(&self.key).await {
            Ok(task) => Some(task),
            Err(StorageError::NotFound { .. }) => None,
            Err(e) => return Err(TaskError::from_storage(e, self.key.as_str())),
        };
        tracing::debug!(
            task_key = %self.key,
            found = entry.is_some(),
            version = entry.as_ref().map_or(0, |t| t.version),
            "task refreshed"
        );
        self.synced = Some(Synced {
            entry,
            synced_at_ms: self.clock.now_epoch_ms(),
        });
        Ok(self.snapshot())
    }

    fn is_fresh(&self) -> bool {
        match &self.synced {
            Some(Synced {
                entry: Some(_),
                synced_at_ms,
            }) => {
                let age_ms = self.clock.now_epoch_ms().saturating_sub(*synced_at_ms);
                age_ms <= duration_ms(self.staleness_threshold)
            },
            _ => false,
        }
    }

    /// Serves the snapshot if fresh, otherwise re-reads first.
    async fn synced_record(&mut self) -> Result<Option<&TaskRecord>, TaskError> {
        if self.is_fresh() {
            return Ok(self.snapshot().map(|t| &t.record));
        }
        Ok(self.fetch().await?.map(|t| &t.record))
    }

    async fn write(&mut self, record: TaskRecord) -> Result<(), TaskError> {
        let version = self
            .store
            .put(&self.key, &record)
            .await
            .map_err(|e| TaskError::from_storage(e, self.key.as_str()))?;
        self.cache(record, version);
        Ok(())
    }

    fn cache(&mut self, record: TaskRecord, version: u64) {
        self.synced = Some(Synced {
            entry: Some(VersionedTask {
                key: self.key.clone(),
                record,
                version,
            }),
            synced_at_ms: self.clock.now_epoch_ms(),
        });
    }
}
