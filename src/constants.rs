//! Fixed protocol constants.
//!
//! These are the defaults behind [`QueueConfig`](crate::config::QueueConfig).
//! Workers sharing a store should agree on them; the claim protocol's
//! timing assumptions are only as good as the slowest participant's.

use std::time::Duration;

/// Age after which a cached record must be re-read before being served.
pub const STALENESS_THRESHOLD: Duration = Duration::from_secs(120);

/// Maximum re-reads while waiting for a claim write to become visible.
pub const CLAIM_VERIFY_ATTEMPTS: u32 = 120;

/// Delay between claim verification re-reads.
pub const CLAIM_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Number of `ready` candidates fetched per claim attempt.
pub const CANDIDATE_PAGE_SIZE: usize = 100;

/// Largest batch the document store commits atomically.
pub const MAX_BATCH_SIZE: usize = 250;

/// Failures after which a task is moved to `dead` instead of back to `ready`.
pub const DEFAULT_MAX_FAILURES: u32 = 5;

/// Owner ID of a task nobody holds.
pub const UNALLOCATED_OWNER: &str = "";
