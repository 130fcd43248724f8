//! Integration tests against a real `DynamoDB` table.
//!
//! Enabled with `--features dynamodb-tests`. Requires AWS credentials and a
//! table named by `DOCQUEUE_TEST_TABLE` (partition key `PK`, String) with
//! the default state index. Each test uses its own job name and cleans up
//! only the keys it created.

#![cfg(feature = "dynamodb-tests")]

use std::sync::Arc;

use docqueue::store::dynamodb::DynamoDbStore;
use docqueue::store::StorageError;
use docqueue::{DocumentStore, LifecycleState, QueueConfig, SourceMap, TaskController};
use uuid::Uuid;

async fn controller() -> (Arc<DynamoDbStore>, TaskController) {
    let table = std::env::var("DOCQUEUE_TEST_TABLE").unwrap_or_else(|_| "docqueue_test".into());
    let store = Arc::new(
        DynamoDbStore::from_env_with_table(table)
            .await
            .with_consistent_reads(true),
    );
    let job = format!("it-{}", Uuid::new_v4());
    let controller = TaskController::new(store.clone(), job)
        .with_config(QueueConfig::default().with_claim_attempts(30));
    (store, controller)
}

#[tokio::test]
async fn create_claim_and_finish() {
    let (store, controller) = controller().await;
    let keys = controller
        .create_tasks(&["one", "two"], &SourceMap::new())
        .await
        .unwrap();

    let mut handle = controller.handle(keys[0].clone());
    assert_eq!(handle.get_input().await.unwrap().as_deref(), Some("one"));
    assert_eq!(handle.get_state().await.unwrap(), Some(LifecycleState::Ready));

    handle.set_result("done-one").await.unwrap();
    handle.set_state(LifecycleState::Dead).await.unwrap();
    let stored = store.get(&keys[0]).await.unwrap();
    assert_eq!(stored.record.lifecycle_state, LifecycleState::Dead);
    assert!(stored.version >= 2);

    store.delete_batch(&keys).await.unwrap();
}

#[tokio::test]
async fn versioned_write_conflicts() {
    let (store, controller) = controller().await;
    let keys = controller
        .create_tasks(&["x"], &SourceMap::new())
        .await
        .unwrap();

    let current = store.get(&keys[0]).await.unwrap();
    store
        .put_if_version(&keys[0], &current.record, current.version)
        .await
        .unwrap();
    let err = store
        .put_if_version(&keys[0], &current.record, current.version)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::VersionConflict { expected, actual, .. }
            if expected == current.version && actual == current.version + 1
    ));

    store.delete_batch(&keys).await.unwrap();
    let err = store
        .put_if_version(&keys[0], &current.record, current.version + 1)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn upserts_never_reuse_a_version() {
    let (store, controller) = controller().await;
    let keys = controller
        .create_tasks(&["v"], &SourceMap::new())
        .await
        .unwrap();
    let record = store.get(&keys[0]).await.unwrap().record;

    let mut versions = Vec::new();
    for _ in 0..3 {
        versions.push(store.put(&keys[0], &record).await.unwrap());
    }
    assert_eq!(versions, vec![2, 3, 4]);

    store.delete_batch(&keys).await.unwrap();
}

#[tokio::test]
async fn batches_larger_than_one_request() {
    let (store, controller) = controller().await;
    let inputs: Vec<String> = (0..60).map(|i| i.to_string()).collect();
    let keys = controller
        .create_tasks(&inputs, &SourceMap::new())
        .await
        .unwrap();
    assert_eq!(keys.len(), 60);

    let counts = controller.query_task_state().await.unwrap();
    assert_eq!(counts[controller.job_name()][&LifecycleState::Ready], 60);

    store.delete_batch(&keys).await.unwrap();
}
