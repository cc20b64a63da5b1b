//! In-process metrics aggregation
//!
//! Counters are plain atomics so recording never blocks a poller. Averages and
//! rates are derived from the counters when a snapshot is taken, at most once
//! per second.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

use crate::model::TaskOperation;

const DERIVED_REFRESH: Duration = Duration::from_secs(1);

/// Count/success/failure/duration counters for one category
#[derive(Debug, Default)]
struct CategoryCounters {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    duration_ms: AtomicU64,
}

impl CategoryCounters {
    fn record(&self, duration: Duration, success: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn average_ms(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.duration_ms.load(Ordering::Relaxed) as f64 / total as f64
    }
}

/// Per task-operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Derived {
    avg_response_time_ms: f64,
    requests_per_second: f64,
    avg_task_time_ms: f64,
    tasks_per_second: f64,
}

#[derive(Debug, Default)]
struct DerivedCache {
    computed_at: Option<Instant>,
    values: Derived,
}

/// Samples process-level readings
struct SystemProbe {
    pid: Pid,
    system: System,
}

impl SystemProbe {
    fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: System::new_with_specifics(
                RefreshKind::new().with_processes(ProcessRefreshKind::everything()),
            ),
        }
    }

    fn memory_mb(&mut self) -> f64 {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        self.system
            .process(self.pid)
            .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }
}

/// Number of live tasks on the current tokio runtime, 0 outside a runtime
fn live_runtime_tasks() -> usize {
    tokio::runtime::Handle::try_current()
        .map(|handle| handle.metrics().num_alive_tasks())
        .unwrap_or(0)
}

/// Point-in-time view of every metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    // HTTP
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub active_connections: i64,
    pub requests_per_second: f64,
    pub avg_response_time_ms: f64,

    // Tasks
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub tasks_per_second: f64,
    pub avg_task_time_ms: f64,
    pub queue_depth: u64,
    pub max_queue_depth: u64,
    pub operations: BTreeMap<String, OperationStats>,

    // System
    pub uptime_seconds: u64,
    pub worker_count: usize,
    pub memory_usage_mb: f64,

    pub last_request_at: Option<DateTime<Utc>>,
    pub last_task_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// HTTP error rate in percent, `None` before the first request
    pub fn error_rate(&self) -> Option<f64> {
        if self.total_requests == 0 {
            return None;
        }
        Some(self.failed_requests as f64 / self.total_requests as f64 * 100.0)
    }
}

/// Shared metrics sink for the HTTP adapter and the worker pool
///
/// # Example
///
/// ```
/// use inbox_engine::{MetricsAggregator, TaskOperation};
/// use std::time::Duration;
///
/// let metrics = MetricsAggregator::new();
/// metrics.record_task_execution(&TaskOperation::Insert, Duration::from_millis(12), true);
/// metrics.set_queue_depth(3);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.completed_tasks, 1);
/// assert_eq!(snapshot.max_queue_depth, 3);
/// ```
pub struct MetricsAggregator {
    started: Instant,
    http: CategoryCounters,
    tasks: CategoryCounters,
    active_connections: AtomicI64,
    queue_depth: AtomicU64,
    max_queue_depth: AtomicU64,
    operations: DashMap<String, OperationStats>,
    last_request_at: Mutex<Option<DateTime<Utc>>>,
    last_task_at: Mutex<Option<DateTime<Utc>>>,
    derived: Mutex<DerivedCache>,
    probe: Mutex<SystemProbe>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            http: CategoryCounters::default(),
            tasks: CategoryCounters::default(),
            active_connections: AtomicI64::new(0),
            queue_depth: AtomicU64::new(0),
            max_queue_depth: AtomicU64::new(0),
            operations: DashMap::new(),
            last_request_at: Mutex::new(None),
            last_task_at: Mutex::new(None),
            derived: Mutex::new(DerivedCache::default()),
            probe: Mutex::new(SystemProbe::new()),
        }
    }

    // =========================================================================
    // HTTP
    // =========================================================================

    /// Record a served HTTP request
    pub fn record_http_request(&self, duration: Duration, success: bool) {
        self.http.record(duration, success);
        *self.last_request_at.lock() = Some(Utc::now());
    }

    pub fn increment_active_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Record one apply attempt
    pub fn record_task_execution(
        &self,
        operation: &TaskOperation,
        duration: Duration,
        success: bool,
    ) {
        self.tasks.record(duration, success);

        let mut entry = self
            .operations
            .entry(operation.as_str().to_string())
            .or_default();
        entry.total += 1;
        entry.total_duration_ms += duration.as_millis() as u64;
        if success {
            entry.succeeded += 1;
        } else {
            entry.failed += 1;
        }
        drop(entry);

        *self.last_task_at.lock() = Some(Utc::now());
    }

    /// Set the current queue depth, tracking the high-water mark
    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);

        let mut current_max = self.max_queue_depth.load(Ordering::Relaxed);
        while depth > current_max {
            match self.max_queue_depth.compare_exchange_weak(
                current_max,
                depth,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(new) => current_max = new,
            }
        }
    }

    pub fn queue_depth(&self) -> u64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    fn derived(&self) -> Derived {
        let mut cache = self.derived.lock();
        let stale = cache
            .computed_at
            .map_or(true, |at| at.elapsed() >= DERIVED_REFRESH);

        if stale {
            let uptime = self.started.elapsed().as_secs_f64();
            let rate = |count: u64| {
                if uptime > 0.0 {
                    count as f64 / uptime
                } else {
                    0.0
                }
            };

            cache.values = Derived {
                avg_response_time_ms: self.http.average_ms(),
                requests_per_second: rate(self.http.total()),
                avg_task_time_ms: self.tasks.average_ms(),
                tasks_per_second: rate(self.tasks.total()),
            };
            cache.computed_at = Some(Instant::now());
        }

        cache.values
    }

    /// Take a snapshot, sampling process memory and runtime task count
    pub fn snapshot(&self) -> MetricsSnapshot {
        let derived = self.derived();
        let memory_usage_mb = self.probe.lock().memory_mb();

        MetricsSnapshot {
            total_requests: self.http.total(),
            successful_requests: self.http.success.load(Ordering::Relaxed),
            failed_requests: self.http.failure.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            requests_per_second: derived.requests_per_second,
            avg_response_time_ms: derived.avg_response_time_ms,

            total_tasks: self.tasks.total(),
            completed_tasks: self.tasks.success.load(Ordering::Relaxed),
            failed_tasks: self.tasks.failure.load(Ordering::Relaxed),
            tasks_per_second: derived.tasks_per_second,
            avg_task_time_ms: derived.avg_task_time_ms,
            queue_depth: self.queue_depth(),
            max_queue_depth: self.max_queue_depth.load(Ordering::Relaxed),
            operations: self
                .operations
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),

            uptime_seconds: self.started.elapsed().as_secs(),
            worker_count: live_runtime_tasks(),
            memory_usage_mb,

            last_request_at: *self.last_request_at.lock(),
            last_task_at: *self.last_task_at.lock(),
            timestamp: Utc::now(),
        }
    }
}
