//! Error types for task queue operations.
//!
//! [`TaskError`] is the domain-level error surfaced by
//! [`TaskHandle`](crate::handle::TaskHandle) and
//! [`TaskController`](crate::controller::TaskController). Store failures
//! arrive as [`StorageError`](crate::store::StorageError) and are mapped
//! here at the domain boundary.

use thiserror::Error;

use crate::store::StorageError;
use crate::types::LifecycleState;

/// Errors that can occur during task operations.
///
/// # Examples
///
/// ```
/// use docqueue::{LifecycleState, TaskError};
///
/// let err = TaskError::InvalidTransition {
///     key: "k1".to_string(),
///     from: None,
///     to: LifecycleState::Allocated,
/// };
/// assert!(err.to_string().contains("allocated"));
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, Error)]
pub enum TaskError {
    /// The record no longer resolves in the store.
    #[error("task not found: {key}")]
    NotFound {
        /// Key of the missing record.
        key: String,
    },

    /// The state machine rejected a transition. `from` is `None` when the
    /// request was refused before the current state was read.
    #[error("invalid transition {} -> {to} for task {key}", state_or_unknown(.from))]
    InvalidTransition {
        /// Key of the task.
        key: String,
        /// State the task was in, if known.
        from: Option<LifecycleState>,
        /// Rejected target state.
        to: LifecycleState,
    },

    /// The claim verification loop ran out of attempts without observing
    /// either this controller's owner ID or a competitor's.
    #[error("claim on task {key} unresolved after {attempts} attempts")]
    ClaimExhausted {
        /// Key of the abandoned candidate.
        key: String,
        /// Number of re-reads performed.
        attempts: u32,
    },

    /// A conditional write found a different version than expected.
    #[error("concurrent modification of task {key}: expected version {expected}, found {actual}")]
    ConcurrentModification {
        /// Key of the contended record.
        key: String,
        /// Version the writer read.
        expected: u64,
        /// Version found in the store.
        actual: u64,
    },

    /// A payload blob could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The store failed or is unreachable. Not recovered locally; callers
    /// retry the whole operation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

fn state_or_unknown(state: &Option<LifecycleState>) -> String {
    state.map_or_else(|| "?".to_string(), |s| s.to_string())
}

impl TaskError {
    /// Returns `true` for failures a caller may reasonably retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::ConcurrentModification { .. }
        )
    }

    /// Maps a store error for the record at `key` into a domain error.
    pub(crate) fn from_storage(err: StorageError, key: &str) -> Self {
        match err {
            StorageError::NotFound { .. } => Self::NotFound {
                key: key.to_string(),
            },
            StorageError::VersionConflict {
                expected, actual, ..
            } => Self::ConcurrentModification {
                key: key.to_string(),
                expected,
                actual,
            },
            StorageError::CapacityExceeded { message } => Self::StoreUnavailable(message),
            StorageError::Backend { message, .. } => Self::StoreUnavailable(message),
        }
    }
}

/// Errors from the blob codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Compression or decompression failed (including corrupt input).
    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),

    /// Decompressed bytes were not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The source map could not be serialized or parsed.
    #[error("source map encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}
