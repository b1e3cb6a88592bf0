//! Environment variable and config file support for [`PoolConfig`].
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: fields assigned on [`PoolConfig`] after loading
//! 2. **Environment variables**: values from `COFUTURE_POOL_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`PoolConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `COFUTURE_POOL_MAX_THREADS` | `usize` | `max_threads` |
//! | `COFUTURE_POOL_IDLE_TIMEOUT_MS` | `u64` | `idle_timeout` |
//! | `COFUTURE_POOL_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |

use std::time::Duration;

use crate::runtime::config::{ConfigError, PoolConfig};

/// Environment variable name for the worker thread cap.
pub const ENV_POOL_MAX_THREADS: &str = "COFUTURE_POOL_MAX_THREADS";
/// Environment variable name for the idle timeout, in milliseconds.
pub const ENV_POOL_IDLE_TIMEOUT_MS: &str = "COFUTURE_POOL_IDLE_TIMEOUT_MS";
/// Environment variable name for the worker thread name prefix.
pub const ENV_POOL_THREAD_NAME_PREFIX: &str = "COFUTURE_POOL_THREAD_NAME_PREFIX";

/// Apply environment variable overrides to a [`PoolConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut PoolConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_POOL_MAX_THREADS) {
        config.max_threads = parse_usize(ENV_POOL_MAX_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_POOL_IDLE_TIMEOUT_MS) {
        config.idle_timeout = Duration::from_millis(parse_u64(ENV_POOL_IDLE_TIMEOUT_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_POOL_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidValue {
            var: var_name.to_string(),
            reason: format!("expected unsigned integer, got {val:?} ({e})"),
        })
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue {
            var: var_name.to_string(),
            reason: format!("expected milliseconds, got {val:?} ({e})"),
        })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable pool configuration.
///
/// ```toml
/// [pool]
/// max_threads = 4
/// idle_timeout_ms = 500
/// thread_name_prefix = "myapp"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct CofutureTomlConfig {
    /// Pool settings.
    #[serde(default)]
    pub pool: PoolToml,
}

/// Pool section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct PoolToml {
    /// Maximum number of worker threads.
    pub max_threads: Option<usize>,
    /// Idle timeout in milliseconds.
    pub idle_timeout_ms: Option<u64>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
}

/// Apply a parsed TOML config to a [`PoolConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut PoolConfig, toml: &CofutureTomlConfig) {
    if let Some(v) = toml.pool.max_threads {
        config.max_threads = v;
    }
    if let Some(v) = toml.pool.idle_timeout_ms {
        config.idle_timeout = Duration::from_millis(v);
    }
    if let Some(ref v) = toml.pool.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
}

/// Parse a TOML string into a [`CofutureTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<CofutureTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file into a [`CofutureTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<CofutureTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        clean_env_locked();
        f()
    }

    fn with_env<F, R>(var: &str, val: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_envs(&[(var, val)], f)
    }

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_clean_env(|| {
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
            let result = f();
            for (k, _) in vars {
                std::env::remove_var(k);
            }
            result
        })
    }

    fn clean_env_locked() {
        for var in &[
            ENV_POOL_MAX_THREADS,
            ENV_POOL_IDLE_TIMEOUT_MS,
            ENV_POOL_THREAD_NAME_PREFIX,
        ] {
            std::env::remove_var(var);
        }
    }

    // --- parse helpers ---

    #[test]
    fn parse_usize_valid() {
        assert_eq!(super::parse_usize("TEST", "42").unwrap(), 42);
        assert_eq!(super::parse_usize("TEST", " 100 ").unwrap(), 100);
        assert_eq!(super::parse_usize("TEST", "0").unwrap(), 0);
    }

    #[test]
    fn parse_usize_invalid() {
        assert!(super::parse_usize("TEST", "abc").is_err());
        assert!(super::parse_usize("TEST", "-1").is_err());
        assert!(super::parse_usize("TEST", "3.14").is_err());
        assert!(super::parse_usize("TEST", "").is_err());
    }

    #[test]
    fn parse_u64_invalid() {
        assert!(super::parse_u64("TEST", "soon").is_err());
    }

    // --- apply_env_overrides ---

    #[test]
    fn env_overrides_max_threads() {
        with_env(ENV_POOL_MAX_THREADS, "8", || {
            let mut config = PoolConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.max_threads, 8);
        });
    }

    #[test]
    fn env_overrides_idle_timeout() {
        with_env(ENV_POOL_IDLE_TIMEOUT_MS, "250", || {
            let mut config = PoolConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.idle_timeout, Duration::from_millis(250));
        });
    }

    #[test]
    fn env_overrides_thread_name_prefix() {
        with_env(ENV_POOL_THREAD_NAME_PREFIX, "myapp", || {
            let mut config = PoolConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.thread_name_prefix, "myapp");
        });
    }

    #[test]
    fn env_overrides_unset_vars_leave_defaults() {
        with_clean_env(|| {
            let defaults = PoolConfig::default();
            let mut config = PoolConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config, defaults);
        });
    }

    #[test]
    fn from_env_normalizes_zero_threads() {
        with_envs(
            &[(ENV_POOL_MAX_THREADS, "0"), (ENV_POOL_IDLE_TIMEOUT_MS, "5")],
            || {
                let config = PoolConfig::from_env().unwrap();
                assert_eq!(config.max_threads, 1);
                assert_eq!(config.idle_timeout, Duration::from_millis(5));
            },
        );
    }

    #[test]
    fn env_overrides_invalid_value_returns_error() {
        with_env(ENV_POOL_MAX_THREADS, "not_a_number", || {
            let mut config = PoolConfig::default();
            let err = apply_env_overrides(&mut config).unwrap_err();
            let msg = err.to_string();
            assert!(
                msg.contains(ENV_POOL_MAX_THREADS),
                "error should mention var name: {msg}"
            );
            assert!(
                msg.contains("not_a_number"),
                "error should mention bad value: {msg}"
            );
        });
    }
}

#[cfg(all(test, feature = "config-file"))]
mod toml_tests {
    use super::*;

    #[test]
    fn parse_toml_full_config() {
        let toml_str = r#"
[pool]
max_threads = 8
idle_timeout_ms = 200
thread_name_prefix = "myapp"
"#;
        let parsed = parse_toml_str(toml_str).unwrap();
        assert_eq!(parsed.pool.max_threads, Some(8));
        assert_eq!(parsed.pool.idle_timeout_ms, Some(200));
        assert_eq!(parsed.pool.thread_name_prefix.as_deref(), Some("myapp"));
    }

    #[test]
    fn parse_toml_empty_config() {
        let parsed = parse_toml_str("").unwrap();
        assert_eq!(parsed.pool.max_threads, None);
    }

    #[test]
    fn parse_toml_invalid_syntax() {
        let err = parse_toml_str("not valid toml {{{{").unwrap_err();
        assert!(err.to_string().contains("TOML"));
    }

    #[test]
    fn parse_toml_wrong_type() {
        let result = parse_toml_str(
            r#"
[pool]
max_threads = "many"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn apply_toml_overrides_config() {
        let parsed = parse_toml_str("[pool]\nmax_threads = 16\n").unwrap();
        let mut config = PoolConfig::default();
        apply_toml_config(&mut config, &parsed);
        assert_eq!(config.max_threads, 16);
        // Unset fields remain at defaults.
        assert_eq!(config.idle_timeout, PoolConfig::default().idle_timeout);
    }

    #[test]
    fn toml_file_not_found() {
        let err = parse_toml_file(std::path::Path::new("/nonexistent/cofuture.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn toml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cofuture.toml");
        std::fs::write(&path, "[pool]\nmax_threads = 2\nidle_timeout_ms = 64\n").unwrap();

        let parsed = parse_toml_file(&path).unwrap();
        let mut config = PoolConfig::default();
        apply_toml_config(&mut config, &parsed);
        assert_eq!(config.max_threads, 2);
        assert_eq!(config.idle_timeout, Duration::from_millis(64));
    }
}
