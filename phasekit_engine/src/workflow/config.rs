//! Engine configuration.
//!
//! [`EngineConfig`] is plain serde data with defaults for every field, so a
//! YAML file only needs to name what it overrides:
//!
//! ```yaml
//! pool_capacity: 2
//! timeouts:
//!   task_timeout: 30000   # milliseconds, null disables
//! retry:
//!   backoff:
//!     initial_delay_ms: 500
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use phasekit_core::{ConcurrencyPool, FileStateStore, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// Time limit for a single collaborator invocation.
///
/// Serialized as a number of milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub struct TaskTimeout(Duration);

impl TaskTimeout {
    /// Creates a new TaskTimeout with the specified duration.
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Creates a TaskTimeout from seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Creates a TaskTimeout from milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Returns the timeout duration.
    pub fn duration(&self) -> Duration {
        self.0
    }
}

impl Default for TaskTimeout {
    /// Default timeout is 10 minutes.
    fn default() -> Self {
        Self(Duration::from_secs(600))
    }
}

impl From<u64> for TaskTimeout {
    fn from(millis: u64) -> Self {
        Self::from_millis(millis)
    }
}

impl From<TaskTimeout> for u64 {
    fn from(timeout: TaskTimeout) -> Self {
        u64::try_from(timeout.0.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Timeout settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-attempt limit; `None` lets collaborators run unbounded
    pub task_timeout: Option<TaskTimeout>,
}

impl TimeoutConfig {
    /// Creates a config with no time limits.
    pub fn no_timeouts() -> Self {
        Self { task_timeout: None }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            task_timeout: Some(TaskTimeout::default()),
        }
    }
}

/// Configuration for a [`WorkflowEngine`](super::engine::WorkflowEngine).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of concurrently running tasks
    pub pool_capacity: usize,
    /// Attempt budget for tasks that do not set their own
    pub default_max_attempts: u32,
    /// Time limits
    pub timeouts: TimeoutConfig,
    /// Retry backoff
    pub retry: RetryPolicy,
    /// Directory for file-backed run records
    pub state_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_capacity: ConcurrencyPool::DEFAULT_CAPACITY,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeouts: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
            state_dir: PathBuf::from(".phasekit/runs"),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a YAML configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::Config(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a YAML configuration file.
    pub async fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
            EngineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Sets the pool capacity.
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Sets the default attempt budget.
    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    /// Sets the per-attempt timeout (`None` disables it).
    pub fn with_task_timeout(mut self, timeout: Option<TaskTimeout>) -> Self {
        self.timeouts.task_timeout = timeout;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Sets the state directory.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.pool_capacity == 0 {
            return Err(EngineError::Config(
                "pool_capacity must be at least 1".to_string(),
            ));
        }
        if self.default_max_attempts == 0 {
            return Err(EngineError::Config(
                "default_max_attempts must be at least 1".to_string(),
            ));
        }
        let backoff = &self.retry.backoff;
        if !backoff.factor.is_finite() || backoff.factor < 1.0 {
            return Err(EngineError::Config(format!(
                "retry.backoff.factor must be >= 1.0, got {}",
                backoff.factor
            )));
        }
        Ok(())
    }

    /// Returns a file-backed store rooted at `state_dir`.
    pub fn file_store(&self) -> FileStateStore {
        FileStateStore::new(&self.state_dir)
    }

    pub(crate) fn task_timeout(&self) -> Option<Duration> {
        self.timeouts.task_timeout.map(|t| t.duration())
    }
}
