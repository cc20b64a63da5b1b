//! Worker pool for inbox task execution
//!
//! Owns the pollers, the cleanup sweeper and the retry scheduler, and shuts
//! them down in an order that leaves no store write behind.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::apply::TaskApplier;
use super::poller::TaskPoller;
use super::sweeper::CleanupSweeper;
use crate::config::EngineConfig;
use crate::metrics::MetricsAggregator;
use crate::persistence::{RecordStore, StoreError, TaskStore};
use crate::reliability::{RetryHandle, RetryScheduler};

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Worker pool already running
    #[error("worker pool is already running")]
    AlreadyRunning,
}

struct RunningPool {
    shutdown_tx: watch::Sender<bool>,
    pollers: Vec<JoinHandle<()>>,
    sweeper: JoinHandle<()>,
    retries: RetryHandle,
    scheduler: JoinHandle<()>,
}

/// Pool of fixed-interval pollers draining the inbox
///
/// # Example
///
/// ```ignore
/// use inbox_engine::{EngineConfig, MetricsAggregator, WorkerPool};
///
/// let pool = WorkerPool::new(tasks, records, Arc::new(MetricsAggregator::new()), EngineConfig::default());
/// pool.start().await?;
///
/// // ... later, graceful shutdown
/// pool.shutdown().await;
/// ```
pub struct WorkerPool {
    tasks: Arc<dyn TaskStore>,
    applier: Arc<TaskApplier>,
    metrics: Arc<MetricsAggregator>,
    config: EngineConfig,
    running: Mutex<Option<RunningPool>>,
}

impl WorkerPool {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        records: Arc<dyn RecordStore>,
        metrics: Arc<MetricsAggregator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tasks,
            applier: Arc::new(TaskApplier::new(records)),
            metrics,
            config,
            running: Mutex::new(None),
        }
    }

    /// Start the pollers, the sweeper and the retry scheduler
    ///
    /// Reads task stats once to seed the queue depth, which also verifies the
    /// task store is reachable.
    #[instrument(skip(self), fields(worker_count = self.config.worker_count))]
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        if self.is_running() {
            return Err(WorkerPoolError::AlreadyRunning);
        }

        let stats = self.tasks.stats().await?;
        self.metrics.set_queue_depth(stats.queue_depth());

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(WorkerPoolError::AlreadyRunning);
        }

        info!(
            worker_count = self.config.worker_count,
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_retries = self.config.retry.max_retries,
            pending = stats.pending,
            "Starting worker pool"
        );

        if self.config.worker_count == 0 {
            warn!("worker_count is 0, starting a single poller");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (retries, scheduler) = RetryScheduler::spawn(Arc::clone(&self.tasks));

        let pollers = (0..self.config.worker_count.max(1))
            .map(|worker| {
                let poller = TaskPoller::new(
                    worker,
                    Arc::clone(&self.tasks),
                    Arc::clone(&self.applier),
                    Arc::clone(&self.metrics),
                    self.config.retry.clone(),
                    retries.clone(),
                    self.config.batch_size,
                    self.config.poll_interval,
                    shutdown_rx.clone(),
                );
                tokio::spawn(poller.run())
            })
            .collect();

        let sweeper = CleanupSweeper::new(
            Arc::clone(&self.tasks),
            Arc::clone(&self.metrics),
            self.config.cleanup_interval,
            self.config.retention,
            shutdown_rx,
        );
        let sweeper = tokio::spawn(sweeper.run());

        *running = Some(RunningPool {
            shutdown_tx,
            pollers,
            sweeper,
            retries,
            scheduler,
        });

        Ok(())
    }

    /// Shut the pool down gracefully
    ///
    /// Signals every poller and the sweeper, waits for in-flight batches to
    /// finish, then stops the retry scheduler, which releases every delayed
    /// retry to pending before exiting. Returns once all of it has exited.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        info!("Initiating graceful shutdown");
        let _ = running.shutdown_tx.send(true);

        for handle in running.pollers {
            if let Err(e) = handle.await {
                error!("Poller terminated abnormally: {}", e);
            }
        }
        if let Err(e) = running.sweeper.await {
            error!("Cleanup sweeper terminated abnormally: {}", e);
        }

        // Pollers held the only other handles
        drop(running.retries);
        if let Err(e) = running.scheduler.await {
            error!("Retry scheduler terminated abnormally: {}", e);
        }

        info!("Worker pool stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Number of failed tasks waiting out their retry delay
    pub fn waiting_retries(&self) -> usize {
        self.running
            .lock()
            .as_ref()
            .map(|r| r.retries.waiting())
            .unwrap_or(0)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
