//! Runtime configuration types.
//!
//! These types hold the concrete values that size the [`ThreadPool`]. Build a
//! [`PoolConfig`] (optionally layered with environment and file overrides, see
//! [`env_config`](super::env_config)), then hand it to
//! [`ThreadPool::from_config`].
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `max_threads` | available CPU parallelism |
//! | `idle_timeout` | 1 s |
//! | `thread_name_prefix` | `"cofuture"` |
//!
//! [`ThreadPool`]: super::thread_pool::ThreadPool
//! [`ThreadPool::from_config`]: super::thread_pool::ThreadPool::from_config

use std::time::Duration;

/// Default name prefix for pool worker threads.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "cofuture";

/// Default idle time before a pool worker retires.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Error raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A setting was present but could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable or key that carried the value.
        var: String,
        /// What was wrong with it.
        reason: String,
    },
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file was not valid TOML for the expected layout.
    #[error("failed to parse TOML config: {0}")]
    Parse(String),
}

impl From<ConfigError> for crate::error::Error {
    fn from(err: ConfigError) -> Self {
        Self::new(crate::error::ErrorKind::InvalidConfig)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// Thread pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of worker threads (default: available parallelism).
    pub max_threads: usize,
    /// How long a worker waits for work before retiring.
    pub idle_timeout: Duration,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
}

impl PoolConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.max_threads == 0 {
            self.max_threads = 1;
        }
        if self.thread_name_prefix.trim().is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    /// Returns the default configuration with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a `COFUTURE_POOL_*` variable
    /// is set to a value that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        super::env_config::apply_env_overrides(&mut config)?;
        config.normalize();
        Ok(config)
    }

    /// Returns the default number of worker threads.
    #[must_use]
    pub fn default_max_threads() -> usize {
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_threads: Self::default_max_threads(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}
