//! Task record -- the persisted representation of a task.
//!
//! [`TaskRecord`] holds exactly the fields stored per task. The store
//! assigns each record a [`TaskKey`] on insertion and a monotonic version on
//! every write; [`VersionedTask`] carries all three together as one
//! immutable snapshot.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::UNALLOCATED_OWNER;
use crate::types::LifecycleState;

/// Mapping of source file names to their contents, attached to every task
/// of a batch.
pub type SourceMap = BTreeMap<String, String>;

/// Opaque, store-assigned identity of a task record.
///
/// # Examples
///
/// ```
/// use docqueue::TaskKey;
///
/// let key = TaskKey::new("abc");
/// assert_eq!(key.as_str(), "abc");
/// assert_eq!(key.to_string(), "abc");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(String);

impl TaskKey {
    /// Wraps an existing key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generates a fresh random key (`UUIDv4`).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted state of one task.
///
/// Records are normally created by
/// [`TaskController::create_tasks`](crate::controller::TaskController::create_tasks)
/// and mutated only through a [`TaskHandle`](crate::handle::TaskHandle).
/// Every write replaces the whole record (last write wins).
///
/// The owner is expected to be non-empty exactly while the task is
/// `Allocated` or `Started`. The store cannot enforce this atomically, so
/// readers must tolerate short-lived violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Name of the job this task belongs to.
    pub job_name: String,

    /// Current lifecycle state, stored as its ordinal.
    pub lifecycle_state: LifecycleState,

    /// Owner ID of the worker holding the task; empty when unallocated.
    #[serde(rename = "ownerID")]
    pub owner_id: String,

    /// Creation time in milliseconds since the epoch. Never changes.
    pub creation_epoch_ms: i64,

    /// Time of the last state change or heartbeat, in epoch milliseconds.
    pub last_update_epoch_ms: i64,

    /// Number of failed processing attempts.
    pub failure_count: u32,

    /// Compressed task input.
    pub input_blob: Vec<u8>,

    /// Compressed task result; empty until a result is written.
    pub output_blob: Vec<u8>,

    /// Compressed source map.
    pub source_blob: Vec<u8>,
}

impl TaskRecord {
    /// Creates a `Ready`, unowned record stamped with `now_ms` as both its
    /// creation and last-update time.
    ///
    /// # Examples
    ///
    /// ```
    /// use docqueue::{LifecycleState, TaskRecord};
    ///
    /// let record = TaskRecord::new_ready("job-1", 1_700_000_000_000, vec![1], vec![2]);
    /// assert_eq!(record.lifecycle_state, LifecycleState::Ready);
    /// assert!(record.is_unallocated());
    /// assert_eq!(record.failure_count, 0);
    /// assert_eq!(record.creation_epoch_ms, record.last_update_epoch_ms);
    /// assert!(record.output_blob.is_empty());
    /// ```
    pub fn new_ready(
        job_name: impl Into<String>,
        now_ms: i64,
        input_blob: Vec<u8>,
        source_blob: Vec<u8>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            lifecycle_state: LifecycleState::Ready,
            owner_id: UNALLOCATED_OWNER.to_string(),
            creation_epoch_ms: now_ms,
            last_update_epoch_ms: now_ms,
            failure_count: 0,
            input_blob,
            output_blob: Vec::new(),
            source_blob,
        }
    }

    /// Returns `true` if no worker holds this task.
    pub fn is_unallocated(&self) -> bool {
        self.owner_id == UNALLOCATED_OWNER
    }

    /// Moves the record to `state`, maintaining the owner invariant: the
    /// owner is cleared for every state that does not hold one.
    pub(crate) fn apply_state(&mut self, state: LifecycleState, now_ms: i64) {
        self.lifecycle_state = state;
        if !state.holds_owner() {
            self.owner_id = UNALLOCATED_OWNER.to_string();
        }
        self.last_update_epoch_ms = now_ms;
    }

    /// Marks the record allocated to `owner_id`.
    pub(crate) fn allocate_to(&mut self, owner_id: &str, now_ms: i64) {
        self.lifecycle_state = LifecycleState::Allocated;
        self.owner_id = owner_id.to_string();
        self.last_update_epoch_ms = now_ms;
    }
}

/// A record snapshot as read from (or written to) the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedTask {
    /// Store-assigned key.
    pub key: TaskKey,

    /// The record contents.
    pub record: TaskRecord,

    /// Store version at the time of the read or write.
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> TaskRecord {
        TaskRecord::new_ready("job", 1_000, b"in".to_vec(), b"src".to_vec())
    }

    #[test]
    fn generated_keys_are_unique() {
        let a = TaskKey::generate();
        let b = TaskKey::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn serializes_with_store_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["jobName"], "job");
        assert_eq!(json["lifecycleState"], 0);
        assert_eq!(json["ownerID"], "");
        assert_eq!(json["creationEpochMs"], 1_000);
        assert_eq!(json["lastUpdateEpochMs"], 1_000);
        assert_eq!(json["failureCount"], 0);
    }

    #[test]
    fn serde_round_trip() {
        let mut record = sample();
        record.allocate_to("worker-1", 2_000);
        let json = serde_json::to_string(&record).unwrap();
        let back: TaskRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn allocate_sets_owner_and_timestamp() {
        let mut record = sample();
        record.allocate_to("worker-1", 2_000);
        assert_eq!(record.lifecycle_state, LifecycleState::Allocated);
        assert_eq!(record.owner_id, "worker-1");
        assert_eq!(record.last_update_epoch_ms, 2_000);
        assert_eq!(record.creation_epoch_ms, 1_000);
    }

    #[test]
    fn apply_state_keeps_owner_while_started() {
        let mut record = sample();
        record.allocate_to("worker-1", 2_000);
        record.apply_state(LifecycleState::Started, 3_000);
        assert_eq!(record.owner_id, "worker-1");
        assert_eq!(record.last_update_epoch_ms, 3_000);
    }

    #[test]
    fn apply_state_clears_owner_when_released() {
        for state in [LifecycleState::Ready, LifecycleState::Done, LifecycleState::Dead] {
            let mut record = sample();
            record.allocate_to("worker-1", 2_000);
            record.apply_state(state, 3_000);
            assert!(record.is_unallocated(), "owner kept for {state}");
        }
    }
}
