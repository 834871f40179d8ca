//! Configuration types for memento-gather

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Main configuration for the gatherer
///
/// Fields are organized into sub-configs:
/// - [`persistence`](PersistenceConfig): Record Store location
/// - [`dispatch`](DispatchConfig): backlog scan and batch window
/// - [`worker`](WorkerConfig): worker pool size, time limits, retry policy
/// - [`archive`](ArchiveConfig): archive HTTP client behavior
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data storage configuration
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Batch Dispatcher settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Worker pool settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Archive client settings
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Config {
    /// Load a configuration from a JSON file
    ///
    /// Missing sections and fields fall back to their defaults. The loaded
    /// configuration is validated before being returned.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.chunk_size == 0 {
            return Err(Error::config(
                "dispatch.chunk_size",
                "chunk size must be greater than zero",
            ));
        }
        if self.worker.workers == 0 {
            return Err(Error::config(
                "worker.workers",
                "at least one worker is required",
            ));
        }
        if self.worker.soft_time_limit >= self.worker.hard_time_limit {
            return Err(Error::config(
                "worker.soft_time_limit",
                format!(
                    "soft time limit ({:?}) must be shorter than the hard time limit ({:?})",
                    self.worker.soft_time_limit, self.worker.hard_time_limit
                ),
            ));
        }
        if self.archive.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "archive.retry.backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./memento-gather.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Batch Dispatcher configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Offset into the id-ordered backlog to start scanning from (default: 0)
    #[serde(default)]
    pub start_offset: u64,

    /// Number of records scanned and submitted per batch (default: 1000)
    ///
    /// Larger chunks mean fewer round trips but more memory held per
    /// outstanding batch.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Outstanding batch count above which the dispatcher blocks on the
    /// oldest batch (default: 5, so at most 6 batches are in flight)
    #[serde(default = "default_max_outstanding_batches")]
    pub max_outstanding_batches: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            start_offset: 0,
            chunk_size: default_chunk_size(),
            max_outstanding_batches: default_max_outstanding_batches(),
        }
    }
}

/// Worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers, each with its own archive client (default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Recoverable limit on the remote fetch (default: 120 seconds)
    #[serde(default = "default_soft_time_limit", with = "duration_serde")]
    pub soft_time_limit: Duration,

    /// Unconditional limit on a whole task invocation (default: 150 seconds)
    #[serde(default = "default_hard_time_limit", with = "duration_serde")]
    pub hard_time_limit: Duration,

    /// Delay before a task is re-run after a connection reset (default: 10 seconds)
    #[serde(default = "default_retry_countdown", with = "duration_serde")]
    pub retry_countdown: Duration,

    /// Maximum number of connection-reset retries per record (None = unbounded)
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            soft_time_limit: default_soft_time_limit(),
            hard_time_limit: default_hard_time_limit(),
            retry_countdown: default_retry_countdown(),
            max_retries: None,
        }
    }
}

/// Archive HTTP client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// User-Agent header sent with every playback request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Maximum playback requests per second per client (None = unlimited)
    #[serde(default)]
    pub requests_per_second: Option<u32>,

    /// Connection-level retry policy of the client
    #[serde(default = "default_archive_retry")]
    pub retry: RetryConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            requests_per_second: None,
            retry: default_archive_retry(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./memento-gather.db")
}

fn default_chunk_size() -> u64 {
    1000
}

fn default_max_outstanding_batches() -> usize {
    5
}

fn default_workers() -> usize {
    4
}

fn default_soft_time_limit() -> Duration {
    Duration::from_secs(120)
}

fn default_hard_time_limit() -> Duration {
    Duration::from_secs(150)
}

fn default_retry_countdown() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    format!("memento-gather/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

// The archive session retries hard: many attempts with a short base delay.
fn default_archive_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 20,
        initial_delay: Duration::from_millis(500),
        ..RetryConfig::default()
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (fractional seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
