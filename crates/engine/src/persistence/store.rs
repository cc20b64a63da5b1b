//! RecordStore and TaskStore trait definitions

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Pagination, Record, Task, TaskStats, TaskStatus};

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Insert hit an existing record id
    #[error("record with id '{0}' already exists")]
    DuplicateKey(String),

    /// Record not found
    #[error("record with id '{0}' not found")]
    RecordNotFound(String),

    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable key to document store
///
/// Implementations must be thread-safe; every poller shares one instance.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Create a record. Fails with [`StoreError::DuplicateKey`] if the id exists.
    async fn insert(&self, record: &Record) -> Result<(), StoreError>;

    /// Replace the value of an existing record.
    async fn update(&self, record: &Record) -> Result<(), StoreError>;

    /// Remove a record by id.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Read a record by id.
    async fn get(&self, id: &str) -> Result<Record, StoreError>;

    /// Release underlying connections.
    async fn close(&self);
}

/// Durable table of inbox tasks
///
/// The engine relies on exactly one concurrency guarantee from this trait:
/// [`TaskStore::fetch_and_claim_pending`] must move the returned tasks out of
/// `pending` as part of the same atomic operation that selects them.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    // =========================================================================
    // Producer
    // =========================================================================

    /// Persist a new task
    async fn create_task(&self, task: &Task) -> Result<(), StoreError>;

    // =========================================================================
    // Worker
    // =========================================================================

    /// Claim up to `limit` pending tasks, oldest first
    ///
    /// Returned tasks are already in `processing`. Two concurrent callers never
    /// receive the same task.
    async fn fetch_and_claim_pending(&self, limit: usize) -> Result<Vec<Task>, StoreError>;

    /// Set status and last error, refreshing `updated_at`
    ///
    /// `error = None` clears the stored error.
    async fn update_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Increment the retry counter, returning the new value
    async fn increment_retries(&self, task_id: Uuid) -> Result<u32, StoreError>;

    /// Delete completed/failed tasks not updated within `retention`
    ///
    /// Returns the number of deleted tasks.
    async fn delete_terminal_older_than(&self, retention: Duration) -> Result<u64, StoreError>;

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Get a single task
    async fn get_task(&self, task_id: Uuid) -> Result<Task, StoreError>;

    /// List tasks with the given status, newest first
    async fn list_by_status(
        &self,
        status: TaskStatus,
        pagination: Pagination,
    ) -> Result<Vec<Task>, StoreError>;

    /// List all tasks, newest first
    async fn list_all(&self, pagination: Pagination) -> Result<Vec<Task>, StoreError>;

    /// Task counts by status
    async fn stats(&self) -> Result<TaskStats, StoreError>;

    /// Release underlying connections
    async fn close(&self);
}
