//! Task store double that fails selected calls a set number of times

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Pagination, Task, TaskStats, TaskStatus};
use crate::persistence::{InMemoryTaskStore, StoreError, TaskStore};

/// Delegates to an [`InMemoryTaskStore`] after the configured failures are used up
#[derive(Default)]
pub(crate) struct FlakyTaskStore {
    pub inner: Arc<InMemoryTaskStore>,
    pub claim_failures: AtomicUsize,
    pub delete_failures: AtomicUsize,
    pub completion_failures: AtomicUsize,
}

impl FlakyTaskStore {
    fn trip(counter: &AtomicUsize, what: &str) -> Result<(), StoreError> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(StoreError::Database(format!("{} unavailable", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FlakyTaskStore {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        self.inner.create_task(task).await
    }

    async fn fetch_and_claim_pending(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        Self::trip(&self.claim_failures, "claim")?;
        self.inner.fetch_and_claim_pending(limit).await
    }

    async fn update_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        if status == TaskStatus::Completed {
            Self::trip(&self.completion_failures, "update")?;
        }
        self.inner.update_status(task_id, status, error).await
    }

    async fn increment_retries(&self, task_id: Uuid) -> Result<u32, StoreError> {
        self.inner.increment_retries(task_id).await
    }

    async fn delete_terminal_older_than(&self, retention: Duration) -> Result<u64, StoreError> {
        Self::trip(&self.delete_failures, "delete")?;
        self.inner.delete_terminal_older_than(retention).await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Task, StoreError> {
        self.inner.get_task(task_id).await
    }

    async fn list_by_status(
        &self,
        status: TaskStatus,
        pagination: Pagination,
    ) -> Result<Vec<Task>, StoreError> {
        self.inner.list_by_status(status, pagination).await
    }

    async fn list_all(&self, pagination: Pagination) -> Result<Vec<Task>, StoreError> {
        self.inner.list_all(pagination).await
    }

    async fn stats(&self) -> Result<TaskStats, StoreError> {
        self.inner.stats().await
    }

    async fn close(&self) {}
}
