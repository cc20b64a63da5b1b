//! Retry policy implementation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

/// Configuration for task retries
///
/// Every failed apply consumes one retry. Once the counter reaches
/// `max_retries` the task fails; otherwise it becomes claimable again after
/// the fixed `retry_delay`. There is no backoff and no jitter.
///
/// # Example
///
/// ```
/// use inbox_engine::{RetryDecision, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::fixed(Duration::from_secs(5), 3)
///     .with_non_retryable_error("invalid_operation");
///
/// assert_eq!(policy.decide(1, "store"), RetryDecision::Retry(Duration::from_secs(5)));
/// assert_eq!(policy.decide(3, "store"), RetryDecision::Fail);
/// assert_eq!(policy.decide(1, "invalid_operation"), RetryDecision::Fail);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Failed attempts after which a task is marked failed
    pub max_retries: u32,

    /// Delay before a failed task is returned to pending
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,

    /// Failure kinds that should NOT be retried
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}

/// What to do with a task after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the task to pending after the delay
    Retry(Duration),

    /// Mark the task failed
    Fail,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5), 3)
    }
}

impl RetryPolicy {
    /// Create a policy with a fixed delay
    pub fn fixed(retry_delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_delay,
            non_retryable_errors: vec![],
        }
    }

    /// Create a policy that fails a task on its first error
    pub fn no_retry() -> Self {
        Self::fixed(Duration::ZERO, 1)
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Add a non-retryable failure kind
    pub fn with_non_retryable_error(mut self, kind: impl Into<String>) -> Self {
        self.non_retryable_errors.push(kind.into());
        self
    }

    /// Check if a failure kind should be retried
    pub fn should_retry(&self, kind: &str) -> bool {
        !self.non_retryable_errors.iter().any(|k| k == kind)
    }

    /// Check if there is budget left after `retries` failed attempts
    pub fn has_retries_remaining(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Decide the fate of a task whose retry counter is now `retries`
    pub fn decide(&self, retries: u32, kind: &str) -> RetryDecision {
        if self.has_retries_remaining(retries) && self.should_retry(kind) {
            RetryDecision::Retry(self.retry_delay)
        } else {
            RetryDecision::Fail
        }
    }
}
