//! End-to-end task lifecycle tests: create, claim, start, finish, and the
//! aggregate reports a scheduler reads along the way. Also drives the
//! worker loop over processors that succeed and fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use docqueue::codec;
use docqueue::store::memory::InMemoryStore;
use docqueue::store::{StorageError, TaskQuery};
use docqueue::worker::{ProcessError, TaskProcessor};
use docqueue::{
    DocumentStore, LifecycleState, ManualClock, QueueConfig, SourceMap, TaskController,
    TaskError, TaskKey, TaskRecord, VersionedTask, Worker,
};

fn setup(job: &str) -> (Arc<InMemoryStore>, TaskController) {
    let store = Arc::new(InMemoryStore::new());
    let controller =
        TaskController::new(store.clone(), job).with_clock(Arc::new(ManualClock::new(1_000)));
    (store, controller)
}

/// Fails the n-th (1-based) batch write or batch delete.
struct FailingBatchStore {
    inner: InMemoryStore,
    fail_put_at: Option<usize>,
    fail_delete_at: Option<usize>,
    put_batches: AtomicUsize,
    delete_batches: AtomicUsize,
}

impl FailingBatchStore {
    fn new(fail_put_at: Option<usize>, fail_delete_at: Option<usize>) -> Self {
        Self {
            inner: InMemoryStore::new(),
            fail_put_at,
            fail_delete_at,
            put_batches: AtomicUsize::new(0),
            delete_batches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for FailingBatchStore {
    async fn get(&self, key: &TaskKey) -> Result<VersionedTask, StorageError> {
        self.inner.get(key).await
    }
    async fn put(&self, key: &TaskKey, record: &TaskRecord) -> Result<u64, StorageError> {
        self.inner.put(key, record).await
    }
    async fn put_if_version(
        &self,
        key: &TaskKey,
        record: &TaskRecord,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        self.inner.put_if_version(key, record, expected_version).await
    }
    async fn put_batch(&self, records: &[TaskRecord]) -> Result<Vec<TaskKey>, StorageError> {
        let n = self.put_batches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_put_at == Some(n) {
            return Err(StorageError::backend("throttled"));
        }
        self.inner.put_batch(records).await
    }
    async fn delete_batch(&self, keys: &[TaskKey]) -> Result<usize, StorageError> {
        let n = self.delete_batches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_delete_at == Some(n) {
            return Err(StorageError::backend("throttled"));
        }
        self.inner.delete_batch(keys).await
    }
    fn query(&self, query: TaskQuery) -> BoxStream<'_, Result<VersionedTask, StorageError>> {
        self.inner.query(query)
    }
}

// ─── Scheduler Scenario ─────────────────────────────────────────────────────

mod scenario {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn create_claim_complete_report() {
        let (_store, controller) = setup("J");
        controller
            .create_tasks(&["a", "b", "c"], &SourceMap::new())
            .await
            .unwrap();
        assert_eq!(
            controller.query_tasks_ready().await.unwrap(),
            HashMap::from([("J".to_string(), 3)])
        );

        let mut handle = controller.claim_next_ready_task().await.unwrap().unwrap();
        assert_eq!(
            controller.query_tasks_ready().await.unwrap(),
            HashMap::from([("J".to_string(), 2)])
        );

        handle.set_result("42").await.unwrap();
        handle.set_state(LifecycleState::Done).await.unwrap();

        let results = controller.query_results_for_job().await.unwrap();
        assert!(results.contains(&"42".to_string()));

        assert_eq!(
            controller.query_task_state().await.unwrap(),
            HashMap::from([(
                "J".to_string(),
                HashMap::from([(LifecycleState::Ready, 2), (LifecycleState::Done, 1)])
            )])
        );
    }

    #[tokio::test]
    async fn results_are_scoped_to_the_job() {
        let store = Arc::new(InMemoryStore::new());
        let mine = TaskController::new(store.clone(), "mine");
        let theirs = TaskController::new(store.clone(), "theirs");
        theirs.create_tasks(&["x"], &SourceMap::new()).await.unwrap();

        let mut handle = theirs.claim_next_ready_task().await.unwrap().unwrap();
        handle.set_result("not mine").await.unwrap();
        handle.set_state(LifecycleState::Done).await.unwrap();

        assert!(mine.query_results_for_job().await.unwrap().is_empty());
        assert_eq!(theirs.query_results_for_job().await.unwrap(), vec!["not mine".to_string()]);
    }
}

// ─── Batches ────────────────────────────────────────────────────────────────

mod batches {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn state_counts_sum_to_created_tasks() {
        let (_store, controller) = setup("bulk");
        let inputs: Vec<String> = (0..613).map(|i| format!("input-{i}")).collect();
        let keys = controller.create_tasks(&inputs, &SourceMap::new()).await.unwrap();
        assert_eq!(keys.len(), 613);

        let counts = controller.query_task_state().await.unwrap();
        let total: usize = counts["bulk"].values().sum();
        assert_eq!(total, 613);
    }

    #[tokio::test]
    async fn create_is_not_idempotent() {
        let (store, controller) = setup("J");
        controller.create_tasks(&["same"], &SourceMap::new()).await.unwrap();
        controller.create_tasks(&["same"], &SourceMap::new()).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn delete_all_removes_more_than_one_batch() {
        let (store, controller) = setup("J");
        let inputs: Vec<String> = (0..260).map(|i| i.to_string()).collect();
        controller.create_tasks(&inputs, &SourceMap::new()).await.unwrap();

        assert_eq!(controller.delete_all_tasks().await.unwrap(), 260);
        assert!(store.is_empty());
        assert!(controller.query_task_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_create_batch_keeps_earlier_batches() {
        let store = Arc::new(FailingBatchStore::new(Some(2), None));
        let controller = TaskController::new(store.clone(), "J");
        let inputs: Vec<String> = (0..600).map(|i| i.to_string()).collect();

        let err = controller
            .create_tasks(&inputs, &SourceMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::StoreUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(store.inner.len(), 250);
        assert_eq!(store.put_batches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_delete_batch_keeps_remaining_tasks() {
        let store = Arc::new(FailingBatchStore::new(None, Some(2)));
        let controller = TaskController::new(store.clone(), "J");
        let inputs: Vec<String> = (0..600).map(|i| i.to_string()).collect();
        controller.create_tasks(&inputs, &SourceMap::new()).await.unwrap();

        let err = controller.delete_all_tasks().await.unwrap_err();
        assert!(matches!(err, TaskError::StoreUnavailable(_)));
        assert_eq!(store.inner.len(), 350);

        let counts = controller.query_task_state().await.unwrap();
        assert_eq!(counts["J"][&LifecycleState::Ready], 350);
    }

    #[tokio::test]
    async fn sources_attach_to_every_task() {
        let (store, controller) = setup("J");
        let sources = SourceMap::from([
            ("lib.rs".to_string(), "pub fn f() {}".to_string()),
            ("main.rs".to_string(), "fn main() {}".to_string()),
        ]);
        let keys = controller.create_tasks(&["a", "b"], &sources).await.unwrap();

        for key in keys {
            let mut handle = controller.handle(key.clone());
            assert_eq!(handle.get_source().await.unwrap(), Some(sources.clone()));
            assert_eq!(store.get(&key).await.unwrap().version, 1);
        }
    }
}

// ─── State Progression ──────────────────────────────────────────────────────

mod progression {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn happy_path_is_monotonic_and_final() {
        let (_store, controller) = setup("J");
        controller.create_tasks(&["a"], &SourceMap::new()).await.unwrap();

        let mut handle = controller.claim_next_ready_task().await.unwrap().unwrap();
        assert_eq!(handle.get_state().await.unwrap(), Some(LifecycleState::Allocated));
        handle.set_state(LifecycleState::Started).await.unwrap();
        handle.set_state(LifecycleState::Done).await.unwrap();

        for next in LifecycleState::ALL {
            let err = handle.set_state(next).await.unwrap_err();
            assert!(matches!(err, TaskError::InvalidTransition { .. }), "{next}");
        }
        assert_eq!(handle.get_state().await.unwrap(), Some(LifecycleState::Done));
        assert_eq!(handle.get_owner_id().await.unwrap().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn released_task_can_be_claimed_again() {
        let (_store, controller) = setup("J");
        let keys = controller.create_tasks(&["a"], &SourceMap::new()).await.unwrap();

        let mut first = controller.claim_next_ready_task().await.unwrap().unwrap();
        first.set_state(LifecycleState::Started).await.unwrap();
        first.set_state(LifecycleState::Ready).await.unwrap();

        let second = controller.claim_next_ready_task().await.unwrap().unwrap();
        assert_eq!(second.key(), &keys[0]);
    }

    #[tokio::test]
    async fn finishing_a_deleted_task_does_not_recreate_it() {
        let (store, controller) = setup("J");
        controller.create_tasks(&["a"], &SourceMap::new()).await.unwrap();
        let mut handle = controller.claim_next_ready_task().await.unwrap().unwrap();
        assert_eq!(controller.delete_all_tasks().await.unwrap(), 1);

        let err = handle.set_result("42").await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound { .. }));
        let err = handle.set_state(LifecycleState::Done).await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound { .. }));

        assert!(store.is_empty());
        assert!(controller.query_task_state().await.unwrap().is_empty());
        assert!(controller.query_results_for_job().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn any_live_task_can_be_killed() {
        let (_store, controller) = setup("J");
        let keys = controller.create_tasks(&["a", "b"], &SourceMap::new()).await.unwrap();

        controller
            .handle(keys[0].clone())
            .set_state(LifecycleState::Dead)
            .await
            .unwrap();
        let mut claimed = controller.claim_next_ready_task().await.unwrap().unwrap();
        claimed.set_state(LifecycleState::Dead).await.unwrap();

        let counts = controller.query_task_state().await.unwrap();
        assert_eq!(counts["J"][&LifecycleState::Dead], 2);
    }
}

// ─── Worker ─────────────────────────────────────────────────────────────────

mod worker {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Echo;

    #[async_trait]
    impl TaskProcessor for Echo {
        async fn process(&self, input: String, sources: SourceMap) -> Result<String, ProcessError> {
            Ok(format!("{input}:{}", sources.len()))
        }
    }

    struct AlwaysFails {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskProcessor for AlwaysFails {
        async fn process(
            &self,
            _input: String,
            _sources: SourceMap,
        ) -> Result<String, ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err("boom".into())
        }
    }

    #[tokio::test]
    async fn processes_every_task_to_done() {
        let (_store, controller) = setup("J");
        let sources = SourceMap::from([("s".to_string(), "t".to_string())]);
        controller.create_tasks(&["a", "b"], &sources).await.unwrap();

        let worker = Worker::new(controller);
        assert_eq!(worker.run_until_idle(&Echo).await.unwrap(), 2);

        let mut results = worker.controller().query_results_for_job().await.unwrap();
        results.sort();
        assert_eq!(results, vec!["a:1".to_string(), "b:1".to_string()]);
        assert!(!worker.run_once(&Echo).await.unwrap());
    }

    #[tokio::test]
    async fn failing_task_is_retried_until_dead() {
        let (store, controller) = setup("J");
        let keys = controller.create_tasks(&["a"], &SourceMap::new()).await.unwrap();

        let worker =
            Worker::new(controller.with_config(QueueConfig::default().with_max_failures(3)));
        let processor = AlwaysFails {
            calls: AtomicUsize::new(0),
        };
        assert_eq!(worker.run_until_idle(&processor).await.unwrap(), 3);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);

        let record = store.get(&keys[0]).await.unwrap().record;
        assert_eq!(record.lifecycle_state, LifecycleState::Dead);
        assert_eq!(record.failure_count, 3);
        assert!(record.is_unallocated());
    }

    #[tokio::test]
    async fn undecodable_task_is_released_not_stranded() {
        let (store, controller) = setup("J");
        let sources = codec::encode_sources(&SourceMap::new()).unwrap();
        let keys = store
            .put_batch(&[TaskRecord::new_ready("J", 1_000, vec![0xde, 0xad], sources)])
            .await
            .unwrap();

        let worker = Worker::new(controller);
        let err = worker.run_once(&Echo).await.unwrap_err();
        assert!(matches!(err, TaskError::Codec(_)));

        let record = store.get(&keys[0]).await.unwrap().record;
        assert_eq!(record.lifecycle_state, LifecycleState::Ready);
        assert_eq!(record.failure_count, 1);
        assert!(record.is_unallocated());
    }
}
