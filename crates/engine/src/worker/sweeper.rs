//! Retention cleanup of terminal tasks

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::MetricsAggregator;
use crate::persistence::{StoreError, TaskStore};

/// Periodically deletes completed/failed tasks older than the retention window
pub struct CleanupSweeper {
    tasks: Arc<dyn TaskStore>,
    metrics: Arc<MetricsAggregator>,
    interval: Duration,
    retention: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl CleanupSweeper {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        metrics: Arc<MetricsAggregator>,
        interval: Duration,
        retention: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            tasks,
            metrics,
            interval: interval.max(Duration::from_millis(1)),
            retention,
            shutdown_rx,
        }
    }

    /// Sweep every interval until shutdown; the first sweep is one interval
    /// after start
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!("Cleanup sweep failed: {}", e);
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    debug!("Cleanup sweeper: shutdown requested");
                    break;
                }
            }
        }

        debug!("Cleanup sweeper exited");
    }

    /// Run one sweep, returning the number of deleted tasks
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<u64, StoreError> {
        match self.tasks.stats().await {
            Ok(stats) => debug!(
                total = stats.total,
                completed = stats.completed,
                failed = stats.failed,
                "Task stats before cleanup"
            ),
            Err(e) => warn!("Failed to read task stats before cleanup: {}", e),
        }

        let deleted = self.tasks.delete_terminal_older_than(self.retention).await?;

        match self.tasks.stats().await {
            Ok(stats) => {
                self.metrics.set_queue_depth(stats.queue_depth());
                info!(
                    deleted,
                    total = stats.total,
                    pending = stats.pending,
                    processing = stats.processing,
                    completed = stats.completed,
                    failed = stats.failed,
                    "Cleanup sweep finished"
                );
            }
            Err(e) => {
                warn!("Failed to read task stats after cleanup: {}", e);
                info!(deleted, "Cleanup sweep finished");
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Task, TaskOperation, TaskStatus};
    use crate::persistence::InMemoryTaskStore;
    use crate::worker::testing::FlakyTaskStore;

    #[tokio::test]
    async fn test_sweep_deletes_only_expired_terminal_tasks() {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let metrics = Arc::new(MetricsAggregator::new());
        let (_tx, rx) = watch::channel(false);
        let sweeper = CleanupSweeper::new(
            tasks.clone(),
            metrics.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            rx,
        );

        let old = Task::new(TaskOperation::Insert, serde_json::json!({"id": "a"}));
        let fresh = Task::new(TaskOperation::Insert, serde_json::json!({"id": "b"}));
        let waiting = Task::new(TaskOperation::Insert, serde_json::json!({"id": "c"}));
        for task in [&old, &fresh, &waiting] {
            tasks.create_task(task).await.unwrap();
        }
        tasks
            .update_status(old.id, TaskStatus::Completed, None)
            .await
            .unwrap();
        tasks
            .update_status(fresh.id, TaskStatus::Completed, None)
            .await
            .unwrap();
        tasks.backdate(old.id, Duration::from_secs(7200)).unwrap();
        tasks.backdate(waiting.id, Duration::from_secs(7200)).unwrap();

        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert!(tasks.get_task(old.id).await.is_err());
        assert!(tasks.get_task(fresh.id).await.is_ok());
        assert_eq!(metrics.queue_depth(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sweep_waits_one_interval() {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let (tx, rx) = watch::channel(false);
        let sweeper = CleanupSweeper::new(
            tasks.clone(),
            Arc::new(MetricsAggregator::new()),
            Duration::from_secs(60),
            Duration::ZERO,
            rx,
        );

        let task = Task::new(TaskOperation::Delete, serde_json::json!({"id": "a"}));
        tasks.create_task(&task).await.unwrap();
        tasks
            .update_status(task.id, TaskStatus::Failed, Some("x"))
            .await
            .unwrap();
        tasks.backdate(task.id, Duration::from_secs(1)).unwrap();

        let handle = tokio::spawn(sweeper.run());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(tasks.task_count(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(tasks.task_count(), 0);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sweep_retries_on_next_tick() {
        let store = Arc::new(FlakyTaskStore::default());
        store
            .delete_failures
            .store(1, std::sync::atomic::Ordering::SeqCst);
        let (tx, rx) = watch::channel(false);
        let sweeper = CleanupSweeper::new(
            store.clone(),
            Arc::new(MetricsAggregator::new()),
            Duration::from_secs(60),
            Duration::from_secs(3600),
            rx,
        );

        let task = Task::new(TaskOperation::Insert, serde_json::json!({"id": "a"}));
        store.create_task(&task).await.unwrap();
        store
            .update_status(task.id, TaskStatus::Completed, None)
            .await
            .unwrap();
        store.inner.backdate(task.id, Duration::from_secs(7200)).unwrap();

        let handle = tokio::spawn(sweeper.run());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.delete_failures.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(store.inner.task_count(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.inner.task_count(), 0);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
