//! Queue configuration.

use std::time::Duration;

use crate::constants::{
    CANDIDATE_PAGE_SIZE, CLAIM_RETRY_INTERVAL, CLAIM_VERIFY_ATTEMPTS, DEFAULT_MAX_FAILURES,
    MAX_BATCH_SIZE, STALENESS_THRESHOLD,
};

/// How a controller takes ownership of a `ready` task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimMode {
    /// Write the claim unconditionally, then re-read until this
    /// controller's owner ID (or a competitor's) is observed. Two
    /// controllers can still both believe they won if their writes
    /// interleave before either re-read.
    #[default]
    WriteThenVerify,

    /// Write the claim only if the record's version is unchanged since it
    /// was read as an unowned `ready` task. A successful write is the claim.
    Conditional,
}

/// Tunables for [`TaskController`](crate::controller::TaskController) and
/// [`TaskHandle`](crate::handle::TaskHandle).
///
/// # Defaults
///
/// | Setting                | Default | Description                                  |
/// |------------------------|---------|----------------------------------------------|
/// | `staleness_threshold`  | 120 s   | Cache age before a policy read re-fetches    |
/// | `claim_attempts`       | 120     | Claim verification re-reads per candidate    |
/// | `claim_retry_interval` | 1 s     | Delay between verification re-reads          |
/// | `candidate_page_size`  | 100     | `ready` tasks examined per claim             |
/// | `batch_size`           | 250     | Records per batched create/delete            |
/// | `claim_mode`           | `WriteThenVerify` | See [`ClaimMode`]                   |
/// | `max_failures`         | 5       | Failures before a task is marked `dead`      |
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use docqueue::{ClaimMode, QueueConfig};
///
/// let config = QueueConfig::default()
///     .with_claim_mode(ClaimMode::Conditional)
///     .with_claim_attempts(10);
/// assert_eq!(config.claim_attempts, 10);
/// assert_eq!(config.staleness_threshold, Duration::from_secs(120));
/// ```
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Age after which cached records are re-read before being served.
    pub staleness_threshold: Duration,

    /// Verification re-reads before a claim is abandoned.
    pub claim_attempts: u32,

    /// Delay between verification re-reads.
    pub claim_retry_interval: Duration,

    /// Number of `ready` candidates fetched per claim.
    pub candidate_page_size: usize,

    /// Records per batched write or delete. The controller caps this at
    /// the store's atomic batch limit and treats zero as one.
    pub batch_size: usize,

    /// Claim strategy.
    pub claim_mode: ClaimMode,

    /// Failure count at which a failing task becomes `dead`.
    pub max_failures: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: STALENESS_THRESHOLD,
            claim_attempts: CLAIM_VERIFY_ATTEMPTS,
            claim_retry_interval: CLAIM_RETRY_INTERVAL,
            candidate_page_size: CANDIDATE_PAGE_SIZE,
            batch_size: MAX_BATCH_SIZE,
            claim_mode: ClaimMode::default(),
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

impl QueueConfig {
    /// Sets the cache staleness threshold.
    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    /// Sets the number of claim verification attempts.
    pub fn with_claim_attempts(mut self, attempts: u32) -> Self {
        self.claim_attempts = attempts;
        self
    }

    /// Sets the delay between claim verification attempts.
    pub fn with_claim_retry_interval(mut self, interval: Duration) -> Self {
        self.claim_retry_interval = interval;
        self
    }

    /// Sets the claim candidate page size.
    pub fn with_candidate_page_size(mut self, size: usize) -> Self {
        self.candidate_page_size = size;
        self
    }

    /// Sets the create/delete batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the claim strategy.
    pub fn with_claim_mode(mut self, mode: ClaimMode) -> Self {
        self.claim_mode = mode;
        self
    }

    /// Sets the failure count at which tasks become `dead`.
    pub fn with_max_failures(mut self, max: u32) -> Self {
        self.max_failures = max;
        self
    }
}
