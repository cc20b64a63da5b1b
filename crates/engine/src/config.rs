//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reliability::RetryPolicy;

/// Inbox engine configuration
///
/// # Example
///
/// ```
/// use inbox_engine::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::default()
///     .with_worker_count(8)
///     .with_poll_interval(Duration::from_millis(250))
///     .with_max_retries(5);
///
/// assert_eq!(config.worker_count, 8);
/// assert_eq!(config.retry.max_retries, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Number of independent pollers
    #[serde(deserialize_with = "at_least_one")]
    pub worker_count: usize,

    /// Maximum tasks claimed per poll
    #[serde(deserialize_with = "at_least_one")]
    pub batch_size: usize,

    /// Fixed interval between polls of one poller
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Interval between cleanup sweeps
    #[serde(with = "duration_millis")]
    pub cleanup_interval: Duration,

    /// Minimum age of a terminal task before cleanup deletes it
    #[serde(with = "duration_millis")]
    pub retention: Duration,

    /// Failure handling (retry budget, delay, non-retryable kinds)
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(3600),
            retention: Duration::from_secs(24 * 3600),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Set the number of pollers
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Set the delay before a failed task becomes claimable again
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.retry_delay = delay;
        self
    }

    /// Set the cleanup interval
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the retention window
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}

/// Deserialize a count, raising 0 to 1 like the builders do
fn at_least_one<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(usize::deserialize(deserializer)?.max(1))
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.retry_delay, Duration::from_secs(5));
        assert_eq!(config.cleanup_interval, Duration::from_secs(3600));
        assert_eq!(config.retention, Duration::from_secs(86400));
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::default()
            .with_worker_count(0)
            .with_batch_size(25)
            .with_retry_delay(Duration::from_millis(50))
            .with_retention(Duration::from_secs(60));

        assert_eq!(config.worker_count, 1);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.retry.retry_delay, Duration::from_millis(50));
        assert_eq!(config.retention, Duration::from_secs(60));
    }

    #[test]
    fn test_deserialize_millis() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "worker_count": 2,
                "batch_size": 4,
                "poll_interval": 250,
                "cleanup_interval": 60000,
                "retention": 120000
            }"#,
        )
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert_eq!(config.retry, RetryPolicy::default());

        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_deserialize_clamps_zero_counts() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "worker_count": 0,
                "batch_size": 0,
                "poll_interval": 250,
                "cleanup_interval": 60000,
                "retention": 120000
            }"#,
        )
        .unwrap();

        assert_eq!(config.worker_count, 1);
        assert_eq!(config.batch_size, 1);
    }
}
