//! Fixed-interval task polling
//!
//! Each poller claims a batch on every tick, applies the tasks one after the
//! other, and resolves each to completed, failed or a delayed retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use super::apply::{ApplyError, TaskApplier};
use crate::metrics::MetricsAggregator;
use crate::model::{Task, TaskStatus};
use crate::persistence::{StoreError, TaskStore};
use crate::reliability::{RetryDecision, RetryHandle, RetryPolicy};

/// One of the pool's independent pollers
pub struct TaskPoller {
    worker: usize,
    tasks: Arc<dyn TaskStore>,
    applier: Arc<TaskApplier>,
    metrics: Arc<MetricsAggregator>,
    policy: RetryPolicy,
    retries: RetryHandle,
    batch_size: usize,
    poll_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker: usize,
        tasks: Arc<dyn TaskStore>,
        applier: Arc<TaskApplier>,
        metrics: Arc<MetricsAggregator>,
        policy: RetryPolicy,
        retries: RetryHandle,
        batch_size: usize,
        poll_interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            worker,
            tasks,
            applier,
            metrics,
            policy,
            retries,
            batch_size: batch_size.max(1),
            // tokio intervals panic on zero
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            shutdown_rx,
        }
    }

    /// Poll until shutdown is signaled
    ///
    /// A batch already claimed when the signal arrives is finished first.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(worker = self.worker, "Poller started");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(worker = self.worker, "Poll error: {}", e);
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    debug!(worker = self.worker, "Poller: shutdown requested");
                    break;
                }
            }
        }

        debug!(worker = self.worker, "Poller exited");
    }

    /// Claim one batch and process it, returning the number of tasks claimed
    #[instrument(skip(self), fields(worker = self.worker))]
    pub async fn poll_once(&self) -> Result<usize, StoreError> {
        let tasks = self.tasks.fetch_and_claim_pending(self.batch_size).await?;
        let count = tasks.len();

        for task in tasks {
            self.process(task).await;
        }

        Ok(count)
    }

    async fn process(&self, task: Task) {
        let started = Instant::now();
        let result = self.applier.apply(&task).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                if let Err(e) = self
                    .tasks
                    .update_status(task.id, TaskStatus::Completed, None)
                    .await
                {
                    error!(task_id = %task.id, "Failed to mark task completed: {}", e);
                    return;
                }
                self.metrics
                    .record_task_execution(&task.operation, elapsed, true);
                debug!(
                    task_id = %task.id,
                    operation = %task.operation,
                    duration_ms = elapsed.as_millis() as u64,
                    "Task completed"
                );
            }
            Err(e) => {
                self.metrics
                    .record_task_execution(&task.operation, elapsed, false);
                self.handle_failure(&task, e).await;
            }
        }
    }

    async fn handle_failure(&self, task: &Task, err: ApplyError) {
        let message = err.to_string();

        let retries = match self.tasks.increment_retries(task.id).await {
            Ok(retries) => retries,
            Err(e) => {
                error!(task_id = %task.id, "Failed to increment retries: {}", e);
                task.retries + 1
            }
        };

        match self.policy.decide(retries, err.kind()) {
            RetryDecision::Fail => {
                warn!(
                    task_id = %task.id,
                    operation = %task.operation,
                    retries,
                    error = %message,
                    "Task failed permanently"
                );
                if let Err(e) = self
                    .tasks
                    .update_status(task.id, TaskStatus::Failed, Some(&message))
                    .await
                {
                    error!(task_id = %task.id, "Failed to mark task failed: {}", e);
                }
            }
            RetryDecision::Retry(delay) => {
                warn!(
                    task_id = %task.id,
                    operation = %task.operation,
                    retries,
                    error = %message,
                    "Task failed, scheduling retry"
                );
                if !self.retries.schedule(task.id, delay, message.clone()) {
                    info!(task_id = %task.id, "Retry scheduler stopped, releasing task now");
                    if let Err(e) = self
                        .tasks
                        .update_status(task.id, TaskStatus::Pending, Some(&message))
                        .await
                    {
                        error!(task_id = %task.id, "Failed to return task to pending: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{Record, TaskOperation};
    use crate::persistence::{InMemoryRecordStore, InMemoryTaskStore, RecordStore};
    use crate::reliability::RetryScheduler;
    use crate::worker::testing::FlakyTaskStore;

    struct Fixture {
        tasks: Arc<InMemoryTaskStore>,
        records: Arc<InMemoryRecordStore>,
        metrics: Arc<MetricsAggregator>,
        poller: TaskPoller,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn fixture(policy: RetryPolicy) -> Fixture {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let records = Arc::new(InMemoryRecordStore::new());
        let metrics = Arc::new(MetricsAggregator::new());
        let (retries, _join) = RetryScheduler::spawn(tasks.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = TaskPoller::new(
            0,
            tasks.clone(),
            Arc::new(TaskApplier::new(records.clone())),
            metrics.clone(),
            policy,
            retries,
            10,
            Duration::from_millis(10),
            shutdown_rx,
        );

        Fixture {
            tasks,
            records,
            metrics,
            poller,
            _shutdown_tx: shutdown_tx,
        }
    }

    fn poller_over(
        store: Arc<FlakyTaskStore>,
    ) -> (TaskPoller, Arc<MetricsAggregator>, watch::Sender<bool>) {
        let metrics = Arc::new(MetricsAggregator::new());
        let (retries, _join) = RetryScheduler::spawn(store.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = TaskPoller::new(
            0,
            store,
            Arc::new(TaskApplier::new(Arc::new(InMemoryRecordStore::new()))),
            metrics.clone(),
            RetryPolicy::default(),
            retries,
            10,
            Duration::from_millis(10),
            shutdown_rx,
        );
        (poller, metrics, shutdown_tx)
    }

    async fn enqueue(store: &InMemoryTaskStore, op: TaskOperation, payload: serde_json::Value) -> Task {
        let task = Task::new(op, payload);
        store.create_task(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_poll_once_completes_tasks() {
        let f = fixture(RetryPolicy::default());
        let task = enqueue(
            &f.tasks,
            TaskOperation::Insert,
            json!({"id": "u1", "value": {"a": 1}}),
        )
        .await;

        assert_eq!(f.poller.poll_once().await.unwrap(), 1);

        let stored = f.tasks.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(f.records.get("u1").await.unwrap().value, json!({"a": 1}));
        assert_eq!(f.metrics.snapshot().operations["insert"].succeeded, 1);

        assert_eq!(f.poller.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_schedules_retry() {
        let f = fixture(RetryPolicy::fixed(Duration::from_secs(3600), 3));
        let task = enqueue(&f.tasks, TaskOperation::Delete, json!({"id": "ghost"})).await;

        f.poller.poll_once().await.unwrap();

        let stored = f.tasks.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Processing);
        assert_eq!(stored.retries, 1);
        assert_eq!(f.poller.retries.waiting(), 1);
        assert_eq!(f.metrics.snapshot().failed_tasks, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_kind_fails_immediately() {
        let f = fixture(RetryPolicy::default().with_non_retryable_error("invalid_operation"));
        let task = enqueue(
            &f.tasks,
            TaskOperation::Other("archive".to_string()),
            json!({"id": "a"}),
        )
        .await;

        f.poller.poll_once().await.unwrap();

        let stored = f.tasks.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.retries, 1);
        assert_eq!(
            stored.last_error.as_deref(),
            Some("invalid task operation: archive")
        );
    }

    #[tokio::test]
    async fn test_last_attempt_fails_task() {
        let f = fixture(RetryPolicy::fixed(Duration::ZERO, 1));
        f.records
            .insert(&Record::new("a", json!("first")))
            .await
            .unwrap();
        let task = enqueue(
            &f.tasks,
            TaskOperation::Insert,
            json!({"id": "a", "value": "second"}),
        )
        .await;

        f.poller.poll_once().await.unwrap();

        let stored = f.tasks.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(
            stored.last_error.as_deref(),
            Some("record with id 'a' already exists but with different value")
        );
        assert_eq!(f.records.get("a").await.unwrap().value, json!("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_do_not_stop_the_loop() {
        let store = Arc::new(FlakyTaskStore::default());
        store.claim_failures.store(2, std::sync::atomic::Ordering::SeqCst);
        let task = enqueue(
            &store.inner,
            TaskOperation::Insert,
            json!({"id": "u1", "value": 1}),
        )
        .await;

        let (poller, metrics, shutdown_tx) = poller_over(store.clone());
        let handle = tokio::spawn(poller.run());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.claim_failures.load(std::sync::atomic::Ordering::SeqCst), 0);
        let stored = store.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(metrics.snapshot().completed_tasks, 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_success_not_counted_when_completion_write_fails() {
        let store = Arc::new(FlakyTaskStore::default());
        store
            .completion_failures
            .store(1, std::sync::atomic::Ordering::SeqCst);
        let task = enqueue(
            &store.inner,
            TaskOperation::Insert,
            json!({"id": "u1", "value": 1}),
        )
        .await;

        let (poller, metrics, _shutdown_tx) = poller_over(store.clone());
        assert_eq!(poller.poll_once().await.unwrap(), 1);

        let stored = store.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Processing);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.completed_tasks, 0);
        assert_eq!(snapshot.total_tasks, 0);
    }
}
