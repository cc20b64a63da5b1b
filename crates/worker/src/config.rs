//! Worker configuration loaded from environment variables

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use inbox_engine::EngineConfig;

/// Default number of pooled PostgreSQL connections
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default seconds between health reports
pub const DEFAULT_HEALTH_REPORT_INTERVAL_SECS: u64 = 60;

/// Where records and tasks are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Postgres => write!(f, "postgres"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" | "in-memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// Process-level configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub storage_backend: StorageBackend,
    /// Record store database
    pub database_url: Option<String>,
    /// Task store database; same as `database_url` unless overridden
    pub inbox_database_url: Option<String>,
    pub max_connections: u32,
    pub health_report_interval: Duration,
    pub log_level: Option<String>,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::default(),
            database_url: None,
            inbox_database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            health_report_interval: Duration::from_secs(DEFAULT_HEALTH_REPORT_INTERVAL_SECS),
            log_level: None,
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `STORAGE_BACKEND`: `postgres` or `memory` (default: postgres)
    /// - `DATABASE_URL`: record store connection string
    /// - `INBOX_DATABASE_URL`: task store connection string (default: `DATABASE_URL`)
    /// - `DATABASE_MAX_CONNECTIONS`: pool size per database (default: 10)
    /// - `INBOX_WORKER_COUNT`, `INBOX_BATCH_SIZE`, `INBOX_POLL_INTERVAL_MS`
    /// - `INBOX_MAX_RETRIES`, `INBOX_RETRY_DELAY_MS`
    /// - `INBOX_CLEANUP_INTERVAL_SECS`, `INBOX_RETENTION_HOURS`
    /// - `HEALTH_REPORT_INTERVAL_SECS`: seconds between health logs (default: 60)
    /// - `LOG_LEVEL`: log filter used when `RUST_LOG` is unset
    ///
    /// Values that fail to parse keep their default and produce a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let engine_defaults = EngineConfig::default();

        let database_url = lookup("DATABASE_URL").filter(|s| !s.is_empty());
        let inbox_database_url = lookup("INBOX_DATABASE_URL")
            .filter(|s| !s.is_empty())
            .or_else(|| database_url.clone());

        let engine = EngineConfig::default()
            .with_worker_count(parse_or(
                &lookup,
                "INBOX_WORKER_COUNT",
                engine_defaults.worker_count,
            ))
            .with_batch_size(parse_or(
                &lookup,
                "INBOX_BATCH_SIZE",
                engine_defaults.batch_size,
            ))
            .with_poll_interval(Duration::from_millis(parse_or(
                &lookup,
                "INBOX_POLL_INTERVAL_MS",
                engine_defaults.poll_interval.as_millis() as u64,
            )))
            .with_max_retries(parse_or(
                &lookup,
                "INBOX_MAX_RETRIES",
                engine_defaults.retry.max_retries,
            ))
            .with_retry_delay(Duration::from_millis(parse_or(
                &lookup,
                "INBOX_RETRY_DELAY_MS",
                engine_defaults.retry.retry_delay.as_millis() as u64,
            )))
            .with_cleanup_interval(Duration::from_secs(parse_or(
                &lookup,
                "INBOX_CLEANUP_INTERVAL_SECS",
                engine_defaults.cleanup_interval.as_secs(),
            )))
            .with_retention(retention_from(&lookup, engine_defaults.retention));

        Self {
            storage_backend: parse_or(&lookup, "STORAGE_BACKEND", defaults.storage_backend),
            database_url,
            inbox_database_url,
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections),
            health_report_interval: Duration::from_secs(parse_or(
                &lookup,
                "HEALTH_REPORT_INTERVAL_SECS",
                defaults.health_report_interval.as_secs(),
            )),
            log_level: lookup("LOG_LEVEL").filter(|s| !s.is_empty()),
            engine,
        }
    }
}

/// `INBOX_RETENTION_HOURS` as a duration; values that overflow keep the default
fn retention_from<F>(lookup: &F, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let hours = parse_or(lookup, "INBOX_RETENTION_HOURS", default.as_secs() / 3600);
    match hours.checked_mul(3600) {
        Some(secs) => Duration::from_secs(secs),
        None => {
            tracing::warn!(
                key = "INBOX_RETENTION_HOURS",
                value = hours,
                "Retention out of range, using default"
            );
            default
        }
    }
}

/// Parse `key` or keep `default`, warning when a value is present but invalid
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, value = %raw, error = %e, "Invalid config value, using default");
                default
            }
        },
        _ => default,
    }
}
