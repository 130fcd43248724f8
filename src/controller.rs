//! Scheduler-facing task API.
//!
//! [`TaskController`] creates batches of tasks for one job, claims `ready`
//! tasks on behalf of one worker process, and reports aggregate status.
//!
//! # Claim Protocol
//!
//! The store offers no atomic conditional update in the default
//! [`ClaimMode::WriteThenVerify`] mode, so a claim is a write followed by
//! re-reads:
//!
//! 1. Query up to 100 `ready` tasks, newest first.
//! 2. For each candidate, write it as `allocated` to this controller's
//!    owner ID (last write wins).
//! 3. Re-read up to 120 times, one second apart:
//!    - own owner ID observed: the claim is won;
//!    - empty owner: the write is not visible yet, wait and re-read;
//!    - another owner: a competitor won, move to the next candidate.
//! 4. If the re-reads run out, log and abandon the candidate.
//!
//! Two controllers can still both believe they hold a task if both write
//! before either re-reads. [`ClaimMode::Conditional`] closes that window on
//! stores with versioned writes.

use std::collections::HashMap;
use std::sync::Arc;

use futures::TryStreamExt;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::codec;
use crate::config::{ClaimMode, QueueConfig};
use crate::domain::{SourceMap, TaskKey, TaskRecord};
use crate::error::TaskError;
use crate::handle::TaskHandle;
use crate::store::{DocumentStore, SortOrder, StorageError, TaskQuery};
use crate::types::LifecycleState;

/// Creates, claims, and reports on tasks for one job and one worker.
///
/// Each controller carries a random owner ID, unique per instance, that
/// marks the tasks it claims.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use docqueue::store::memory::InMemoryStore;
/// use docqueue::{SourceMap, TaskController};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let controller = TaskController::new(Arc::new(InMemoryStore::new()), "J");
/// controller
///     .create_tasks(&["a", "b", "c"], &SourceMap::new())
///     .await
///     .unwrap();
///
/// let ready = controller.query_tasks_ready().await.unwrap();
/// assert_eq!(ready.get("J"), Some(&3));
/// # });
/// ```
pub struct TaskController {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    job_name: String,
    owner_id: String,
}

impl std::fmt::Debug for TaskController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskController")
            .field("job_name", &self.job_name)
            .field("owner_id", &self.owner_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskController {
    /// Creates a controller for `job_name` with a fresh random owner ID,
    /// the system clock, and default configuration.
    pub fn new(store: Arc<dyn DocumentStore>, job_name: impl Into<String>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config: QueueConfig::default(),
            job_name: job_name.into(),
            owner_id: Uuid::new_v4().to_string(),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the clock used for timestamps, staleness, and retry sleeps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the generated owner ID.
    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    /// Returns the owner ID written into claimed tasks.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Returns the job this controller creates tasks for.
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Creates a lazy handle for an existing task key, sharing this
    /// controller's store, clock, and staleness threshold.
    pub fn handle(&self, key: TaskKey) -> TaskHandle {
        TaskHandle::new(key, self.store.clone(), self.clock.clone())
            .with_staleness_threshold(self.config.staleness_threshold)
    }

    /// Claims the newest available `ready` task.
    ///
    /// Returns `Ok(None)` when no candidate could be claimed. Candidates
    /// lost to another controller, or whose claim could not be confirmed
    /// within the verification window, are skipped.
    ///
    /// # Errors
    ///
    /// [`TaskError::StoreUnavailable`] if the store fails; the caller is
    /// expected to retry the whole claim.
    pub async fn claim_next_ready_task(&self) -> Result<Option<TaskHandle>, TaskError> {
        let query = TaskQuery::all()
            .with_state(LifecycleState::Ready)
            .order_by(SortOrder::CreatedDescending)
            .limit(self.config.candidate_page_size);
        let candidates: Vec<_> = self
            .store
            .query(query)
            .try_collect()
            .await
            .map_err(query_error)?;

        tracing::debug!(
            owner_id = %self.owner_id,
            candidates = candidates.len(),
            "claiming ready task"
        );

        for candidate in candidates {
            let mut handle = TaskHandle::from_snapshot(
                candidate,
                self.store.clone(),
                self.clock.clone(),
                self.config.staleness_threshold,
            );
            let claimed = match self.config.claim_mode {
                ClaimMode::WriteThenVerify => self.claim_and_verify(&mut handle).await?,
                ClaimMode::Conditional => self.claim_conditionally(&mut handle).await?,
            };
            if claimed {
                tracing::info!(
                    task_key = %handle.key(),
                    owner_id = %self.owner_id,
                    "claimed task"
                );
                return Ok(Some(handle));
            }
        }

        Ok(None)
    }

    /// Creates one `ready` task per input, all sharing `sources`.
    ///
    /// Records are written in batches of the configured size (250 by
    /// default). Not idempotent: repeating a call creates duplicates.
    /// Returns the new keys in input order.
    ///
    /// # Errors
    ///
    /// - [`TaskError::Codec`] if an input cannot be encoded; nothing is
    ///   written.
    /// - [`TaskError::StoreUnavailable`] if a batch fails. Earlier batches
    ///   stay committed; each committed batch is logged with a running count.
    pub async fn create_tasks<S>(
        &self,
        inputs: &[S],
        sources: &SourceMap,
    ) -> Result<Vec<TaskKey>, TaskError>
    where
        S: AsRef<str> + Sync,
    {
        let source_blob = codec::encode_sources(sources)?;
        let now_ms = self.clock.now_epoch_ms();
        let records = inputs
            .iter()
            .map(|input| -> Result<TaskRecord, TaskError> {
                Ok(TaskRecord::new_ready(
                    self.job_name.as_str(),
                    now_ms,
                    codec::encode_text(input.as_ref())?,
                    source_blob.clone(),
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut keys = Vec::with_capacity(records.len());
        for batch in records.chunks(self.batch_size()) {
            let committed = self.store.put_batch(batch).await.map_err(query_error)?;
            keys.extend(committed);
            tracing::info!(
                job_name = %self.job_name,
                batch = batch.len(),
                total = keys.len(),
                "committed task batch"
            );
        }
        Ok(keys)
    }

    /// Deletes every task in the store, across all jobs.
    ///
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// [`TaskError::StoreUnavailable`] if the store fails. Earlier batches
    /// stay deleted.
    pub async fn delete_all_tasks(&self) -> Result<usize, TaskError> {
        let batch_size = self.batch_size();
        let mut tasks = self.store.query(TaskQuery::all());
        let mut pending = Vec::with_capacity(batch_size);
        let mut deleted = 0;

        while let Some(task) = tasks.try_next().await.map_err(query_error)? {
            pending.push(task.key);
            if pending.len() == batch_size {
                deleted += self.delete_batch(&pending, deleted).await?;
                pending.clear();
            }
        }
        if !pending.is_empty() {
            deleted += self.delete_batch(&pending, deleted).await?;
        }
        Ok(deleted)
    }

    /// Returns the decoded results of this job's `done` tasks, in store
    /// order. Tasks marked `done` without a result are skipped.
    ///
    /// # Errors
    ///
    /// - [`TaskError::Codec`] if a stored result cannot be decoded.
    /// - [`TaskError::StoreUnavailable`] if the store fails.
    pub async fn query_results_for_job(&self) -> Result<Vec<String>, TaskError> {
        let query = TaskQuery::all()
            .with_job_name(self.job_name.as_str())
            .with_state(LifecycleState::Done);
        let mut tasks = self.store.query(query);
        let mut results = Vec::new();
        while let Some(task) = tasks.try_next().await.map_err(query_error)? {
            if task.record.output_blob.is_empty() {
                continue;
            }
            results.push(codec::decode_text(&task.record.output_blob)?);
        }
        Ok(results)
    }

    /// Counts `ready` tasks per job.
    ///
    /// The count is taken over a live set and is not a consistent snapshot.
    pub async fn query_tasks_ready(&self) -> Result<HashMap<String, usize>, TaskError> {
        self.store
            .query(TaskQuery::all().with_state(LifecycleState::Ready))
            .try_fold(HashMap::new(), |mut counts, task| async move {
                *counts.entry(task.record.job_name).or_insert(0) += 1;
                Ok(counts)
            })
            .await
            .map_err(query_error)
    }

    /// Counts tasks per job and lifecycle state.
    ///
    /// The count is taken over a live set and is not a consistent snapshot.
    pub async fn query_task_state(
        &self,
    ) -> Result<HashMap<String, HashMap<LifecycleState, usize>>, TaskError> {
        self.store
            .query(TaskQuery::all())
            .try_fold(HashMap::new(), |mut counts, task| async move {
                *counts
                    .entry(task.record.job_name)
                    .or_insert_with(HashMap::new)
                    .entry(task.record.lifecycle_state)
                    .or_insert(0) += 1;
                Ok(counts)
            })
            .await
            .map_err(query_error)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Writes the claim unconditionally, then re-reads until the outcome is
    /// known or the attempts run out.
    async fn claim_and_verify(&self, handle: &mut TaskHandle) -> Result<bool, TaskError> {
        handle.write_claim(&self.owner_id).await?;

        let attempts = self.config.claim_attempts;
        for attempt in 1..=attempts {
            match handle.get_owner_id().await? {
                Some(owner) if owner == self.owner_id => return Ok(true),
                Some(owner) if owner.is_empty() => {
                    tracing::debug!(
                        task_key = %handle.key(),
                        attempt,
                        "claim not yet visible"
                    );
                    self.clock.sleep(self.config.claim_retry_interval).await;
                },
                Some(owner) => {
                    tracing::debug!(
                        task_key = %handle.key(),
                        winner = %owner,
                        attempt,
                        "claim lost to another owner"
                    );
                    return Ok(false);
                },
                None => {
                    tracing::debug!(task_key = %handle.key(), "candidate deleted during claim");
                    return Ok(false);
                },
            }
        }

        let err = TaskError::ClaimExhausted {
            key: handle.key().to_string(),
            attempts,
        };
        tracing::warn!(
            task_key = %handle.key(),
            owner_id = %self.owner_id,
            attempts,
            error = %err,
            "abandoning unresolved claim"
        );
        Ok(false)
    }

    /// Writes the claim only if the candidate is unowned and unchanged since
    /// the query read it.
    async fn claim_conditionally(&self, handle: &mut TaskHandle) -> Result<bool, TaskError> {
        let unowned = handle
            .snapshot()
            .is_some_and(|task| task.record.is_unallocated());
        if !unowned {
            return Ok(false);
        }
        let claimed = handle.write_claim_if_unchanged(&self.owner_id).await?;
        if !claimed {
            tracing::debug!(task_key = %handle.key(), "conditional claim lost");
        }
        Ok(claimed)
    }

    async fn delete_batch(&self, keys: &[TaskKey], so_far: usize) -> Result<usize, TaskError> {
        let deleted = self.store.delete_batch(keys).await.map_err(query_error)?;
        tracing::info!(
            batch = deleted,
            total = so_far + deleted,
            "deleted task batch"
        );
        Ok(deleted)
    }

    fn batch_size(&self) -> usize {
        self.config
            .batch_size
            .min(self.store.max_batch_size())
            .max(1)
    }
}

/// Maps failures of multi-record operations, which have no single key.
fn query_error(err: StorageError) -> TaskError {
    TaskError::StoreUnavailable(err.to_string())
}
