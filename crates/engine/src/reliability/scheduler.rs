//! Delayed retry scheduling
//!
//! One scheduler task per worker pool owns a [`DelayQueue`] of failed tasks
//! waiting out their retry delay. Pollers hand tasks over through a
//! [`RetryHandle`]; when a delay elapses the scheduler moves the task back to
//! `pending`.
//!
//! When every handle is dropped the scheduler releases whatever is still
//! waiting straight to `pending` and exits. The pool relies on this during
//! shutdown so no retry write outlives the stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::model::TaskStatus;
use crate::persistence::TaskStore;

#[derive(Debug)]
struct DelayedRetry {
    task_id: Uuid,
    error: String,
}

/// Sending side of the retry scheduler
#[derive(Clone)]
pub struct RetryHandle {
    tx: mpsc::UnboundedSender<(DelayedRetry, Duration)>,
    waiting: Arc<AtomicUsize>,
}

impl RetryHandle {
    /// Return `task_id` to pending after `delay`, recording `error`
    ///
    /// Returns `false` if the scheduler has already stopped, in which case the
    /// caller owns the task again.
    pub fn schedule(&self, task_id: Uuid, delay: Duration, error: impl Into<String>) -> bool {
        let retry = DelayedRetry {
            task_id,
            error: error.into(),
        };
        self.waiting.fetch_add(1, Ordering::Relaxed);
        if self.tx.send((retry, delay)).is_err() {
            self.waiting.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Number of tasks currently waiting out a retry delay
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }
}

/// Actor owning the delay queue
pub struct RetryScheduler {
    store: Arc<dyn TaskStore>,
    rx: mpsc::UnboundedReceiver<(DelayedRetry, Duration)>,
    waiting: Arc<AtomicUsize>,
}

impl RetryScheduler {
    /// Spawn the scheduler, returning its handle and join handle
    pub fn spawn(store: Arc<dyn TaskStore>) -> (RetryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let waiting = Arc::new(AtomicUsize::new(0));

        let scheduler = Self {
            store,
            rx,
            waiting: Arc::clone(&waiting),
        };
        let join = tokio::spawn(scheduler.run());

        (RetryHandle { tx, waiting }, join)
    }

    async fn run(mut self) {
        let mut queue: DelayQueue<DelayedRetry> = DelayQueue::new();
        let mut keys: HashMap<Uuid, delay_queue::Key> = HashMap::new();

        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some((retry, delay)) => {
                        debug!(task_id = %retry.task_id, ?delay, "retry scheduled");
                        let task_id = retry.task_id;
                        let key = queue.insert(retry, delay);
                        if let Some(stale) = keys.insert(task_id, key) {
                            // Same task handed over twice; keep the latest
                            queue.remove(&stale);
                            self.waiting.fetch_sub(1, Ordering::Relaxed);
                        }
                    }
                    None => break,
                },
                Some(expired) = queue.next(), if !queue.is_empty() => {
                    let retry = expired.into_inner();
                    keys.remove(&retry.task_id);
                    self.release(retry).await;
                }
            }
        }

        if !keys.is_empty() {
            info!(count = keys.len(), "releasing delayed retries on shutdown");
        }
        for (_, key) in keys.drain() {
            let retry = queue.remove(&key).into_inner();
            self.release(retry).await;
        }

        debug!("Retry scheduler exited");
    }

    #[instrument(skip(self, retry), fields(task_id = %retry.task_id))]
    async fn release(&self, retry: DelayedRetry) {
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        match self
            .store
            .update_status(retry.task_id, TaskStatus::Pending, Some(&retry.error))
            .await
        {
            Ok(()) => debug!("task returned to pending"),
            Err(e) => error!("Failed to return task to pending: {}", e),
        }
    }
}
