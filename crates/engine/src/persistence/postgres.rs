//! PostgreSQL implementations of RecordStore and TaskStore
//!
//! Production persistence using PostgreSQL with:
//! - Atomic claim-on-fetch with SKIP LOCKED
//! - Unique-violation detection for idempotent inserts
//! - Schema bootstrap via [`ensure_schema`]

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::store::*;
use crate::model::{Pagination, Record, Task, TaskOperation, TaskStats, TaskStatus};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS records (
        id VARCHAR(255) PRIMARY KEY,
        value JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inbox_tasks (
        id UUID PRIMARY KEY,
        operation VARCHAR(50) NOT NULL,
        payload JSONB NOT NULL,
        status VARCHAR(20) NOT NULL DEFAULT 'pending',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        retries INTEGER NOT NULL DEFAULT 0,
        error TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_inbox_tasks_status ON inbox_tasks (status)",
    "CREATE INDEX IF NOT EXISTS idx_inbox_tasks_created_at ON inbox_tasks (created_at)",
    r#"
    CREATE INDEX IF NOT EXISTS idx_inbox_tasks_pending
        ON inbox_tasks (created_at) WHERE status = 'pending'
    "#,
];

/// Create the `records` and `inbox_tasks` tables and their indexes if missing
#[instrument(skip(pool))]
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await.map_err(|e| {
            error!("Failed to apply schema: {}", e);
            StoreError::Database(e.to_string())
        })?;
    }
    info!("inbox schema ready");
    Ok(())
}

fn db_error(context: &str, e: sqlx::Error) -> StoreError {
    error!("{}: {}", context, e);
    StoreError::Database(e.to_string())
}

// =============================================================================
// Records
// =============================================================================

/// PostgreSQL record store
///
/// # Example
///
/// ```ignore
/// use inbox_engine::PostgresRecordStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mydb").await?;
/// let store = PostgresRecordStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[instrument(skip(self, record), fields(record_id = %record.id))]
    async fn insert(&self, record: &Record) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO records (id, value, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            "#,
        )
        .bind(&record.id)
        .bind(&record.value)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                debug!(record_id = %record.id, "record already exists");
                Err(StoreError::DuplicateKey(record.id.clone()))
            }
            Err(e) => Err(db_error("Failed to insert record", e)),
        }
    }

    #[instrument(skip(self, record), fields(record_id = %record.id))]
    async fn update(&self, record: &Record) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE records
            SET value = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&record.id)
        .bind(&record.value)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update record", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound(record.id.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete record", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound(id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Record, StoreError> {
        let row = sqlx::query("SELECT id, value FROM records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to get record", e))?
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;

        Ok(Record {
            id: row.get("id"),
            value: row.get("value"),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// PostgreSQL task store
///
/// Claiming is a single `UPDATE ... FROM (SELECT ... FOR UPDATE SKIP LOCKED)`
/// statement, so any number of pollers across any number of processes can
/// share one `inbox_tasks` table.
#[derive(Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TASK_COLUMNS: &str =
    "id, operation, payload, status, created_at, updated_at, retries, error";

fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
    let status: String = row.get("status");
    let operation: String = row.get("operation");
    let retries: i32 = row.get("retries");

    Ok(Task {
        id: row.get("id"),
        operation: TaskOperation::parse(&operation),
        payload: row.get("payload"),
        status: status.parse().map_err(StoreError::Database)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        retries: retries.max(0) as u32,
        last_error: row.get("error"),
    })
}

fn tasks_from_rows(rows: &[PgRow]) -> Result<Vec<Task>, StoreError> {
    rows.iter().map(task_from_row).collect()
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    #[instrument(skip(self, task), fields(task_id = %task.id, operation = %task.operation))]
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inbox_tasks (id, operation, payload, status, created_at, updated_at, retries)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(task.id)
        .bind(task.operation.as_str())
        .bind(&task.payload)
        .bind(task.status.as_str())
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.retries as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to create task", e))?;

        debug!(task_id = %task.id, "created task");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_and_claim_pending(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM inbox_tasks
                WHERE status = 'pending'
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE inbox_tasks t
            SET status = 'processing', updated_at = NOW()
            FROM claimable c
            WHERE t.id = c.id
            RETURNING t.id, t.operation, t.payload, t.status, t.created_at,
                      t.updated_at, t.retries, t.error
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to claim tasks", e))?;

        // RETURNING does not preserve the CTE's order
        let mut tasks = tasks_from_rows(&rows)?;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        if !tasks.is_empty() {
            debug!(count = tasks.len(), "claimed tasks");
        }
        Ok(tasks)
    }

    #[instrument(skip(self, error))]
    async fn update_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE inbox_tasks
            SET status = $2, error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update task status", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn increment_retries(&self, task_id: Uuid) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE inbox_tasks
            SET retries = retries + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING retries
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to increment retries", e))?
        .ok_or(StoreError::TaskNotFound(task_id))?;

        let retries: i32 = row.get("retries");
        Ok(retries.max(0) as u32)
    }

    #[instrument(skip(self))]
    async fn delete_terminal_older_than(&self, retention: Duration) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM inbox_tasks
            WHERE status IN ('completed', 'failed')
              AND updated_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(retention.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to delete old tasks", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn get_task(&self, task_id: Uuid) -> Result<Task, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM inbox_tasks WHERE id = $1",
            TASK_COLUMNS
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get task", e))?
        .ok_or(StoreError::TaskNotFound(task_id))?;

        task_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn list_by_status(
        &self,
        status: TaskStatus,
        pagination: Pagination,
    ) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM inbox_tasks
            WHERE status = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            TASK_COLUMNS
        ))
        .bind(status.as_str())
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list tasks by status", e))?;

        tasks_from_rows(&rows)
    }

    #[instrument(skip(self))]
    async fn list_all(&self, pagination: Pagination) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM inbox_tasks
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
            TASK_COLUMNS
        ))
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list tasks", e))?;

        tasks_from_rows(&rows)
    }

    #[instrument(skip(self))]
    async fn stats(&self) -> Result<TaskStats, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM inbox_tasks
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get task stats", e))?;

        let mut stats = TaskStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            let count = count.max(0) as u64;

            stats.total += count;
            match status.parse::<TaskStatus>() {
                Ok(TaskStatus::Pending) => stats.pending = count,
                Ok(TaskStatus::Processing) => stats.processing = count,
                Ok(TaskStatus::Completed) => stats.completed = count,
                Ok(TaskStatus::Failed) => stats.failed = count,
                Err(e) => debug!("ignoring tasks with {}", e),
            }
        }

        Ok(stats)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
