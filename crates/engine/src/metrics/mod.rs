//! Engine observability
//!
//! This module provides:
//! - [`MetricsAggregator`] - Atomic counters for HTTP requests and task executions
//! - [`MetricsSnapshot`] - Point-in-time view including process memory
//! - [`HealthScorer`] - Fixed-threshold health verdict over a snapshot

mod aggregator;
mod health;

pub use aggregator::{MetricsAggregator, MetricsSnapshot, OperationStats};
pub use health::{HealthLevel, HealthScorer, HealthStatus};
