//! Integration tests for the PostgreSQL stores
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p inbox-engine --test postgres_integration_test -- --test-threads=1
//!
//! Every test returns early when DATABASE_URL is not set. The schema is
//! created on first connect via `ensure_schema`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use inbox_engine::persistence::{
    ensure_schema, PostgresRecordStore, PostgresTaskStore, RecordStore, StoreError, TaskStore,
};
use inbox_engine::{Pagination, Record, Task, TaskOperation, TaskStatus};

/// Connect to the test database, or `None` when DATABASE_URL is unset
async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
        return None;
    };
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to PostgreSQL");
    ensure_schema(&pool).await.expect("Failed to apply schema");
    Some(pool)
}

fn unique_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::now_v7())
}

async fn cleanup_tasks(pool: &PgPool, ids: &[Uuid]) {
    sqlx::query("DELETE FROM inbox_tasks WHERE id = ANY($1)")
        .bind(ids)
        .execute(pool)
        .await
        .ok();
}

// ============================================
// Records
// ============================================

#[tokio::test]
async fn test_record_crud() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PostgresRecordStore::new(pool);
    let id = unique_id("rec");

    store
        .insert(&Record::new(&id, json!({"name": "Ann"})))
        .await
        .unwrap();

    let dup = store.insert(&Record::new(&id, json!({"name": "Bob"}))).await;
    assert_eq!(dup, Err(StoreError::DuplicateKey(id.clone())));

    store
        .update(&Record::new(&id, json!({"age": 31})))
        .await
        .unwrap();
    assert_eq!(store.get(&id).await.unwrap().value, json!({"age": 31}));

    store.delete(&id).await.unwrap();
    assert_eq!(
        store.get(&id).await,
        Err(StoreError::RecordNotFound(id.clone()))
    );
    assert_eq!(
        store.delete(&id).await,
        Err(StoreError::RecordNotFound(id.clone()))
    );
    assert!(matches!(
        store.update(&Record::new(&id, json!(1))).await,
        Err(StoreError::RecordNotFound(_))
    ));
}

// ============================================
// Tasks
// ============================================

#[tokio::test]
async fn test_task_lifecycle() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PostgresTaskStore::new(pool.clone());

    let task = Task::new(
        TaskOperation::Update,
        json!({"id": unique_id("t"), "value": {"x": 1}}),
    );
    store.create_task(&task).await.unwrap();

    let stored = store.get_task(task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.operation, TaskOperation::Update);
    assert_eq!(stored.payload, task.payload);

    assert_eq!(store.increment_retries(task.id).await.unwrap(), 1);
    assert_eq!(store.increment_retries(task.id).await.unwrap(), 2);

    store
        .update_status(task.id, TaskStatus::Failed, Some("boom"))
        .await
        .unwrap();
    let stored = store.get_task(task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.retries, 2);
    assert_eq!(stored.last_error.as_deref(), Some("boom"));

    let failed = store
        .list_by_status(TaskStatus::Failed, Pagination::new(100, 0))
        .await
        .unwrap();
    assert!(failed.iter().any(|t| t.id == task.id));

    let missing = Uuid::now_v7();
    assert_eq!(
        store.get_task(missing).await,
        Err(StoreError::TaskNotFound(missing))
    );

    cleanup_tasks(&pool, &[task.id]).await;
}

#[tokio::test]
async fn test_concurrent_claims_are_disjoint() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = Arc::new(PostgresTaskStore::new(pool.clone()));

    let mut ids = vec![];
    for i in 0..40 {
        let task = Task::new(TaskOperation::Insert, json!({"id": unique_id(&i.to_string())}));
        store.create_task(&task).await.unwrap();
        ids.push(task.id);
    }
    let ours: HashSet<Uuid> = ids.iter().copied().collect();

    let mut handles = vec![];
    for _ in 0..4 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut claimed = vec![];
            for _ in 0..20 {
                let batch = store.fetch_and_claim_pending(5).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                assert!(batch.iter().all(|t| t.status == TaskStatus::Processing));
                assert!(batch.windows(2).all(|w| w[0].created_at <= w[1].created_at));
                claimed.extend(batch.into_iter().map(|t| t.id));
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "task {} claimed twice", id);
        }
    }
    assert!(ours.is_subset(&seen));

    cleanup_tasks(&pool, &seen.into_iter().collect::<Vec<_>>()).await;
}

#[tokio::test]
async fn test_delete_terminal_older_than() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PostgresTaskStore::new(pool.clone());

    let old = Task::new(TaskOperation::Delete, json!({"id": unique_id("old")}));
    let fresh = Task::new(TaskOperation::Delete, json!({"id": unique_id("fresh")}));
    for task in [&old, &fresh] {
        store.create_task(task).await.unwrap();
        store
            .update_status(task.id, TaskStatus::Completed, None)
            .await
            .unwrap();
    }
    sqlx::query("UPDATE inbox_tasks SET updated_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
        .bind(old.id)
        .execute(&pool)
        .await
        .unwrap();

    let deleted = store
        .delete_terminal_older_than(Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(deleted >= 1);
    assert!(store.get_task(old.id).await.is_err());
    assert!(store.get_task(fresh.id).await.is_ok());

    cleanup_tasks(&pool, &[fresh.id]).await;
}
