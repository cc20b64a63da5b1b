//! # Inbox Engine
//!
//! A task-queue execution engine behind an inbox-pattern write path: client
//! mutations are staged as durable tasks and applied to a record store
//! asynchronously by a pool of pollers.
//!
//! ## Features
//!
//! - **Durable staging**: a write returns once its task is persisted
//! - **Atomic claim-on-fetch**: no task is applied by two pollers at once
//! - **Bounded retry**: fixed delay, fixed budget, optional non-retryable kinds
//! - **Idempotent inserts**: re-applying an identical insert is a no-op success
//! - **Retention cleanup**: terminal tasks are deleted after a retention window
//! - **Health scoring**: in-process metrics with threshold-based verdicts
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       InboxProducer                          │
//! │  (insert/update/delete requests → pending tasks)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TaskStore                             │
//! │  (PostgreSQL: inbox_tasks, claimed with SKIP LOCKED)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  (pollers apply tasks to the RecordStore, retry, clean up)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use inbox_engine::prelude::*;
//!
//! let pool = PgPool::connect(&database_url).await?;
//! ensure_schema(&pool).await?;
//!
//! let engine = InboxEngine::new(
//!     Arc::new(PostgresTaskStore::new(pool.clone())),
//!     Arc::new(PostgresRecordStore::new(pool)),
//!     EngineConfig::default(),
//! );
//! engine.start().await?;
//!
//! engine
//!     .enqueue_insert(InsertRequest { id: "u1".into(), value: json!({"name": "Ann"}) })
//!     .await?;
//!
//! engine.close().await;
//! ```

pub mod config;
pub mod engine;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod producer;
pub mod reliability;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{InboxEngine, TaskListResponse};
    pub use crate::metrics::{HealthLevel, HealthStatus, MetricsAggregator, MetricsSnapshot};
    pub use crate::model::{Record, Task, TaskOperation, TaskStats, TaskStatus};
    pub use crate::persistence::{
        ensure_schema, InMemoryRecordStore, InMemoryTaskStore, PostgresRecordStore,
        PostgresTaskStore, RecordStore, StoreError, TaskStore,
    };
    pub use crate::producer::{DeleteRequest, InboxError, InsertRequest, UpdateRequest};
    pub use crate::reliability::RetryPolicy;
    pub use crate::worker::{WorkerPool, WorkerPoolError};
}

// Re-export key types at crate root
pub use config::EngineConfig;
pub use engine::{InboxEngine, TaskListResponse};
pub use metrics::{
    HealthLevel, HealthScorer, HealthStatus, MetricsAggregator, MetricsSnapshot, OperationStats,
};
pub use model::{Pagination, Record, Task, TaskOperation, TaskPayload, TaskStats, TaskStatus};
pub use persistence::{
    ensure_schema, InMemoryRecordStore, InMemoryTaskStore, PostgresRecordStore,
    PostgresTaskStore, RecordStore, StoreError, TaskStore,
};
pub use producer::{DeleteRequest, InboxError, InboxProducer, InsertRequest, UpdateRequest};
pub use reliability::{RetryDecision, RetryHandle, RetryPolicy, RetryScheduler};
pub use worker::{ApplyError, CleanupSweeper, TaskApplier, TaskPoller, WorkerPool, WorkerPoolError};
