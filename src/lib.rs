//! Distributed task queue over an eventually-consistent document store.
//!
//! Independent worker processes pull tasks from a shared store, execute
//! them, and report results. A lifecycle state machine and an ownership
//! claim protocol keep two workers from processing the same task at the
//! same time, as far as the store's consistency model allows.
//!
//! # Overview
//!
//! A task progresses `ready -> allocated -> started -> done`, may fall back
//! from `started` to `ready` on failure, and can be marked `dead` from any
//! non-terminal state. Workers claim `ready` tasks through
//! [`TaskController::claim_next_ready_task`], which writes its own owner ID
//! and then re-reads the record until the write is observed (or another
//! owner is observed instead).
//!
//! # Module Organization
//!
//! - [`types`] - The [`LifecycleState`] state machine
//! - [`domain`] - The persisted [`TaskRecord`] and its key/version wrappers
//! - [`codec`] - Compression and encoding of payload blobs
//! - [`store`] - The [`DocumentStore`] trait plus in-memory and `DynamoDB` stores
//! - [`handle`] - [`TaskHandle`], a cached view over one record
//! - [`controller`] - [`TaskController`], batch creation, claiming, and reports
//! - [`worker`] - A claim/execute/report loop over a [`TaskProcessor`]
//! - [`clock`] - Injectable time source for staleness and retry timing
//! - [`config`] - [`QueueConfig`] tunables
//! - [`error`] - [`TaskError`] and [`CodecError`]
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use docqueue::store::memory::InMemoryStore;
//! use docqueue::{LifecycleState, SourceMap, TaskController};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = Arc::new(InMemoryStore::new());
//! let controller = TaskController::new(store, "nightly");
//!
//! controller
//!     .create_tasks(&["a".to_string()], &SourceMap::new())
//!     .await
//!     .unwrap();
//!
//! let mut handle = controller.claim_next_ready_task().await.unwrap().unwrap();
//! assert_eq!(handle.get_input().await.unwrap().as_deref(), Some("a"));
//! handle.set_result("42").await.unwrap();
//! handle.set_state(LifecycleState::Done).await.unwrap();
//!
//! let results = controller.query_results_for_job().await.unwrap();
//! assert_eq!(results, vec!["42".to_string()]);
//! # });
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod constants;
pub mod controller;
pub mod domain;
pub mod error;
pub mod handle;
pub mod store;
pub mod types;
pub mod worker;

// Re-exports for ergonomic access
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClaimMode, QueueConfig};
pub use controller::TaskController;
pub use domain::{SourceMap, TaskKey, TaskRecord, VersionedTask};
pub use error::{CodecError, TaskError};
pub use handle::TaskHandle;
pub use store::{DocumentStore, StorageError, TaskQuery};
pub use types::LifecycleState;
pub use worker::{TaskProcessor, Worker};
