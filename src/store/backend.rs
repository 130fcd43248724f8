//! Document store trait and supporting types.
//!
//! The [`DocumentStore`] trait is the contract every backing store
//! implements: single-record `get`/`put`, a versioned conditional put,
//! batched insert/delete, and a streamed filtered query.
//!
//! Domain logic (state machine validation, claim protocol, caching,
//! payload encoding) does **not** belong here. Stores persist and return
//! [`TaskRecord`]s verbatim; domain logic lives in
//! [`TaskController`](crate::controller::TaskController) and
//! [`TaskHandle`](crate::handle::TaskHandle).
//!
//! # Consistency
//!
//! Implementations may be eventually consistent: a read issued after a
//! committed write may still return the previous value for a while. The
//! claim protocol is built to tolerate exactly that.
//!
//! # Versioning
//!
//! Each stored record carries a monotonic `u64` version starting at 1,
//! incremented on every successful write. [`put`](DocumentStore::put) is
//! last-write-wins and ignores it; [`put_if_version`](DocumentStore::put_if_version)
//! is compare-and-swap.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::constants::MAX_BATCH_SIZE;
use crate::domain::{TaskKey, TaskRecord, VersionedTask};
use crate::types::LifecycleState;

/// Errors that can occur during raw storage operations.
///
/// These are low-level errors from the store. The domain layer maps them
/// to [`TaskError`](crate::error::TaskError) variants before surfacing to
/// callers.
///
/// # Examples
///
/// ```
/// use docqueue::store::StorageError;
///
/// let err = StorageError::NotFound { key: "task-123".to_string() };
/// assert!(err.to_string().contains("task-123"));
///
/// let err = StorageError::VersionConflict {
///     key: "k".to_string(),
///     expected: 2,
///     actual: 3,
/// };
/// assert!(err.to_string().contains("expected 2"));
/// ```
#[derive(Debug)]
pub enum StorageError {
    /// The requested key was not found in storage.
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// A [`put_if_version`](DocumentStore::put_if_version) call failed
    /// because the stored version does not match the expected version.
    VersionConflict {
        /// The key where the conflict occurred.
        key: String,
        /// The version the caller expected.
        expected: u64,
        /// The actual version found in storage.
        actual: u64,
    },

    /// A request exceeded a store limit (e.g., batch size).
    CapacityExceeded {
        /// Human-readable description of the limit.
        message: String,
    },

    /// An I/O or backend-specific error occurred (e.g., network failure,
    /// throttling, timeout).
    Backend {
        /// Human-readable description of the error.
        message: String,
        /// The underlying error, if available. Accessible via
        /// [`std::error::Error::source()`].
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    /// Shorthand for a [`StorageError::Backend`] without an underlying cause.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "key not found: {key}"),
            Self::VersionConflict {
                key,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on key {key}: expected {expected}, found {actual}"
            ),
            Self::CapacityExceeded { message } => {
                write!(f, "capacity exceeded: {message}")
            },
            Self::Backend { message, .. } => write!(f, "backend error: {message}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend {
                source: Some(src), ..
            } => Some(src.as_ref()),
            _ => None,
        }
    }
}

/// Result ordering for a [`TaskQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest `creation_epoch_ms` first.
    CreatedAscending,
    /// Newest `creation_epoch_ms` first.
    CreatedDescending,
}

/// Filtered, optionally ordered and limited query over task records.
///
/// Filters combine with AND. Without an order, results come back in the
/// store's natural order, which is unspecified.
///
/// # Examples
///
/// ```
/// use docqueue::store::{SortOrder, TaskQuery};
/// use docqueue::LifecycleState;
///
/// let query = TaskQuery::all()
///     .with_state(LifecycleState::Ready)
///     .order_by(SortOrder::CreatedDescending)
///     .limit(100);
/// assert_eq!(query.state, Some(LifecycleState::Ready));
/// assert_eq!(query.limit, Some(100));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    /// Only records of this job.
    pub job_name: Option<String>,
    /// Only records in this state.
    pub state: Option<LifecycleState>,
    /// Result ordering.
    pub order: Option<SortOrder>,
    /// Maximum number of records returned.
    pub limit: Option<usize>,
}

impl TaskQuery {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts the query to one job.
    pub fn with_job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    /// Restricts the query to one lifecycle state.
    pub fn with_state(mut self, state: LifecycleState) -> Self {
        self.state = Some(state);
        self
    }

    /// Orders results by creation time.
    pub fn order_by(mut self, order: SortOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Caps the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns `true` if `record` passes every filter of this query.
    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.job_name
            .as_deref()
            .is_none_or(|job| record.job_name == job)
            && self.state.is_none_or(|state| record.lifecycle_state == state)
    }
}

/// Backing document store for task records.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one store is shared by a
/// controller and every handle it produces.
///
/// # No Domain Logic
///
/// Stores never validate transitions, inspect owners, or decode payloads.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Retrieves a record by key.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no record exists for the key.
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn get(&self, key: &TaskKey) -> Result<VersionedTask, StorageError>;

    /// Stores a whole record unconditionally (create or overwrite) and
    /// returns the new version.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn put(&self, key: &TaskKey, record: &TaskRecord) -> Result<u64, StorageError>;

    /// Stores a record only if its current version equals
    /// `expected_version`, returning the new version.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no record exists for the key.
    /// - [`StorageError::VersionConflict`] on version mismatch.
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn put_if_version(
        &self,
        key: &TaskKey,
        record: &TaskRecord,
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// Inserts new records, assigning each a fresh key. Returns the keys in
    /// input order.
    ///
    /// # Errors
    ///
    /// - [`StorageError::CapacityExceeded`] if `records` exceeds
    ///   [`max_batch_size`](DocumentStore::max_batch_size).
    /// - [`StorageError::Backend`] on failure; a prefix of the batch may
    ///   have been committed by stores without multi-record atomicity.
    async fn put_batch(&self, records: &[TaskRecord]) -> Result<Vec<TaskKey>, StorageError>;

    /// Deletes records by key, returning how many existed.
    ///
    /// # Errors
    ///
    /// - [`StorageError::CapacityExceeded`] if `keys` exceeds
    ///   [`max_batch_size`](DocumentStore::max_batch_size).
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn delete_batch(&self, keys: &[TaskKey]) -> Result<usize, StorageError>;

    /// Streams records matching `query`.
    ///
    /// The stream is lazy and may span many round trips. It can only be
    /// restarted by issuing the query again.
    fn query(&self, query: TaskQuery) -> BoxStream<'_, Result<VersionedTask, StorageError>>;

    /// Largest batch accepted by `put_batch` and `delete_batch`.
    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }
}

/// Rejects batches above `limit`.
pub(crate) fn check_batch_size(len: usize, limit: usize) -> Result<(), StorageError> {
    if len > limit {
        return Err(StorageError::CapacityExceeded {
            message: format!("batch of {len} exceeds limit of {limit}"),
        });
    }
    Ok(())
}
