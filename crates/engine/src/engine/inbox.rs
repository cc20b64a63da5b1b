//! InboxEngine facade

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::metrics::{HealthStatus, MetricsAggregator, MetricsSnapshot};
use crate::model::{Pagination, Record, Task, TaskStats, TaskStatus};
use crate::persistence::{RecordStore, StoreError, TaskStore};
use crate::producer::{DeleteRequest, InboxError, InboxProducer, InsertRequest, UpdateRequest};
use crate::worker::{WorkerPool, WorkerPoolError};

/// Default page size for [`InboxEngine::list_tasks`]
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// Largest page size accepted by [`InboxEngine::list_tasks`]
pub const MAX_LIST_LIMIT: u32 = 100;

/// One page of tasks plus the global counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    /// Number of tasks in this page
    pub total: usize,
    pub limit: u32,
    pub offset: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<TaskStats>,
}

/// Owns the stores, the producer, the worker pool and the metrics
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use inbox_engine::{EngineConfig, InMemoryRecordStore, InMemoryTaskStore, InboxEngine, InsertRequest};
///
/// # tokio_test::block_on(async {
/// let engine = InboxEngine::new(
///     Arc::new(InMemoryTaskStore::new()),
///     Arc::new(InMemoryRecordStore::new()),
///     EngineConfig::default(),
/// );
///
/// let task_id = engine
///     .enqueue_insert(InsertRequest { id: "u1".into(), value: serde_json::json!({"a": 1}) })
///     .await
///     .unwrap();
/// assert_eq!(engine.task_stats().await.unwrap().pending, 1);
/// # let _ = task_id;
/// # });
/// ```
pub struct InboxEngine {
    tasks: Arc<dyn TaskStore>,
    records: Arc<dyn RecordStore>,
    producer: InboxProducer,
    pool: WorkerPool,
    metrics: Arc<MetricsAggregator>,
}

impl InboxEngine {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        records: Arc<dyn RecordStore>,
        config: EngineConfig,
    ) -> Self {
        Self::with_metrics(tasks, records, config, Arc::new(MetricsAggregator::new()))
    }

    /// Create an engine reporting into an existing aggregator
    pub fn with_metrics(
        tasks: Arc<dyn TaskStore>,
        records: Arc<dyn RecordStore>,
        config: EngineConfig,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        let producer = InboxProducer::new(Arc::clone(&tasks), Arc::clone(&records));
        let pool = WorkerPool::new(
            Arc::clone(&tasks),
            Arc::clone(&records),
            Arc::clone(&metrics),
            config,
        );

        Self {
            tasks,
            records,
            producer,
            pool,
            metrics,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start background processing
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        self.pool.start().await
    }

    /// Stop background processing; delayed retries are released to pending
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    /// Shut down, then release store connections
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.pool.shutdown().await;
        self.tasks.close().await;
        self.records.close().await;
        info!("Inbox engine closed");
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    // =========================================================================
    // Write path
    // =========================================================================

    pub async fn enqueue_insert(&self, request: InsertRequest) -> Result<Uuid, InboxError> {
        self.producer.insert(request).await
    }

    pub async fn enqueue_update(&self, request: UpdateRequest) -> Result<Uuid, InboxError> {
        self.producer.update(request).await
    }

    pub async fn enqueue_delete(&self, request: DeleteRequest) -> Result<Uuid, InboxError> {
        self.producer.delete(request).await
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Read a record directly, bypassing the inbox
    pub async fn get_record(&self, id: &str) -> Result<Record, InboxError> {
        self.producer.get(id).await
    }

    /// Look up a single task
    pub async fn get_task(&self, task_id: Uuid) -> Result<Task, StoreError> {
        self.tasks.get_task(task_id).await
    }

    /// List tasks newest first, optionally filtered by status
    ///
    /// A `limit` of 0 means [`DEFAULT_LIST_LIMIT`]; larger values are capped at
    /// [`MAX_LIST_LIMIT`]. Failing to read stats does not fail the listing.
    #[instrument(skip(self))]
    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<TaskListResponse, StoreError> {
        let limit = match limit {
            0 => DEFAULT_LIST_LIMIT,
            l => l.min(MAX_LIST_LIMIT),
        };
        let pagination = Pagination::new(limit, offset);

        let tasks = match status {
            Some(status) => self.tasks.list_by_status(status, pagination).await?,
            None => self.tasks.list_all(pagination).await?,
        };

        let stats = match self.tasks.stats().await {
            Ok(stats) => {
                self.metrics.set_queue_depth(stats.queue_depth());
                Some(stats)
            }
            Err(e) => {
                warn!("Failed to get task stats: {}", e);
                None
            }
        };

        Ok(TaskListResponse {
            total: tasks.len(),
            tasks,
            limit,
            offset,
            stats,
        })
    }

    /// Task counts by status
    pub async fn task_stats(&self) -> Result<TaskStats, StoreError> {
        self.tasks.stats().await
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Shared aggregator, for the HTTP layer to record requests into
    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Health verdict over a fresh snapshot, with queue depth read from the store
    pub async fn health_status(&self) -> HealthStatus {
        match self.tasks.stats().await {
            Ok(stats) => self.metrics.set_queue_depth(stats.queue_depth()),
            Err(e) => warn!("Failed to refresh queue depth: {}", e),
        }
        self.metrics.snapshot().health()
    }

    /// Number of failed tasks waiting out their retry delay
    pub fn waiting_retries(&self) -> usize {
        self.pool.waiting_retries()
    }

    pub fn config(&self) -> &EngineConfig {
        self.pool.config()
    }
}
