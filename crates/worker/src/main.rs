use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

use inbox_engine::{
    ensure_schema, HealthLevel, InMemoryRecordStore, InMemoryTaskStore, InboxEngine,
    PostgresRecordStore, PostgresTaskStore, RecordStore, TaskStore,
};
use inbox_worker::{init_tracing, AppConfig, StorageBackend};

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv_path = dotenvy::dotenv().ok();

    let config = AppConfig::from_env();
    init_tracing(config.log_level.as_deref());

    if let Some(path) = dotenv_path {
        tracing::info!("Loaded .env from {:?}", path);
    }

    tracing::info!(
        backend = %config.storage_backend,
        worker_count = config.engine.worker_count,
        batch_size = config.engine.batch_size,
        poll_interval_ms = config.engine.poll_interval.as_millis() as u64,
        max_retries = config.engine.retry.max_retries,
        "inbox-worker starting..."
    );

    let (tasks, records) = build_stores(&config).await?;
    let engine = InboxEngine::new(tasks, records, config.engine.clone());

    engine
        .start()
        .await
        .context("Failed to start inbox engine")?;

    let mut report = tokio::time::interval(
        config
            .health_report_interval
            .max(std::time::Duration::from_secs(1)),
    );
    // The first tick completes immediately
    report.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = report.tick() => report_health(&engine).await,
            _ = &mut shutdown => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    engine.close().await;
    tracing::info!("Worker shutdown complete");
    Ok(())
}

async fn build_stores(config: &AppConfig) -> Result<(Arc<dyn TaskStore>, Arc<dyn RecordStore>)> {
    match config.storage_backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; tasks and records are lost on exit");
            Ok((
                Arc::new(InMemoryTaskStore::new()),
                Arc::new(InMemoryRecordStore::new()),
            ))
        }
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL not set")?;
            let records_pool = connect(database_url, config.max_connections).await?;

            let tasks_pool = match config.inbox_database_url.as_deref() {
                Some(url) if url != database_url => connect(url, config.max_connections).await?,
                _ => records_pool.clone(),
            };

            Ok((
                Arc::new(PostgresTaskStore::new(tasks_pool)),
                Arc::new(PostgresRecordStore::new(records_pool)),
            ))
        }
    }
}

async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("Failed to connect to database")?;
    ensure_schema(&pool)
        .await
        .context("Failed to apply database schema")?;
    Ok(pool)
}

async fn report_health(engine: &InboxEngine) {
    let health = engine.health_status().await;
    let snapshot = engine.metrics_snapshot();

    match health.status {
        HealthLevel::Healthy => tracing::info!(
            score = health.score,
            queue_depth = snapshot.queue_depth,
            completed_tasks = snapshot.completed_tasks,
            failed_tasks = snapshot.failed_tasks,
            waiting_retries = engine.waiting_retries(),
            uptime_seconds = snapshot.uptime_seconds,
            "Health report"
        ),
        _ => tracing::warn!(
            status = %health.status,
            score = health.score,
            queue_depth = snapshot.queue_depth,
            issues = ?health.issues,
            recommendations = ?health.recommendations,
            "Health report"
        ),
    }

    if let Ok(json) = serde_json::to_string(&snapshot) {
        tracing::debug!(snapshot = %json, "Metrics snapshot");
    }
}
