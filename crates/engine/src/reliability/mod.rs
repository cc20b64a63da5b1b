//! Reliability patterns for the inbox
//!
//! This module provides:
//! - [`RetryPolicy`] - Fixed-delay retry budget with non-retryable failure kinds
//! - [`RetryScheduler`] - Pool-owned delay queue returning failed tasks to pending

mod retry;
mod scheduler;

pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{RetryHandle, RetryScheduler};
