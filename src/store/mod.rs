//! Document store trait and implementations.
//!
//! # Architecture
//!
//! 1. **[`DocumentStore`]** -- Persistence contract: get, put, versioned
//!    put, batched insert/delete, streamed query. Shared as
//!    `Arc<dyn DocumentStore>` between a controller and its handles.
//!
//! 2. **Domain layer** -- [`TaskController`](crate::controller::TaskController)
//!    and [`TaskHandle`](crate::handle::TaskHandle) hold all task logic and
//!    talk to the store only through the trait.
//!
//! # Stores
//!
//! - [`InMemoryStore`](crate::store::memory::InMemoryStore) -- Thread-safe
//!   in-memory store using `DashMap`. Immediately consistent; used by tests
//!   and single-process embedding.
//! - [`DynamoDbStore`](crate::store::dynamodb::DynamoDbStore) -- `DynamoDB`
//!   store for production deployments. Available behind the `dynamodb`
//!   feature flag.

pub mod backend;
#[cfg(feature = "dynamodb")]
pub mod dynamodb;
pub mod memory;

pub use backend::{DocumentStore, SortOrder, StorageError, TaskQuery};
