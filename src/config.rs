/*!
 * Configuration types for Bulwark
 */

use bulwark_core_resilience::{CacheConfig, CircuitBreakerConfig, PoolConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for a resilient executor
///
/// Durations are expressed in milliseconds so the TOML form stays flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum live resources per destination
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,

    /// How long a caller waits for a resource when the pool is saturated
    #[serde(default = "default_pool_acquire_timeout_ms")]
    pub pool_acquire_timeout_ms: u64,

    /// Idle resources older than this are discarded (0 = keep forever)
    #[serde(default = "default_pool_idle_timeout_ms")]
    pub pool_idle_timeout_ms: u64,

    /// Resources older than this are discarded (0 = no limit)
    #[serde(default)]
    pub pool_max_lifetime_ms: u64,

    /// Consecutive failures before a destination's circuit opens
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: usize,

    /// Cool-down before an open circuit admits a probe
    #[serde(default = "default_breaker_recovery_timeout_ms")]
    pub breaker_recovery_timeout_ms: u64,

    /// Total attempts per call, including the first
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Delay before the first retry; doubled for each subsequent retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound for a single retry delay
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Randomize retry delays
    #[serde(default = "default_true")]
    pub retry_jitter: bool,

    /// Retry attempts that timed out
    #[serde(default = "default_true")]
    pub retry_on_timeout: bool,

    /// Retry when a resource could not be created
    #[serde(default = "default_true")]
    pub retry_on_resource_failure: bool,

    /// Deadline for a single attempt
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// TTL for cached responses when the caller gives none
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_default_ttl_ms: u64,

    /// Upper bound on cached responses (0 = unbounded)
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_max_size: default_pool_max_size(),
            pool_acquire_timeout_ms: default_pool_acquire_timeout_ms(),
            pool_idle_timeout_ms: default_pool_idle_timeout_ms(),
            pool_max_lifetime_ms: 0,
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_recovery_timeout_ms: default_breaker_recovery_timeout_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter: true,
            retry_on_timeout: true,
            retry_on_resource_failure: true,
            operation_timeout_ms: default_operation_timeout_ms(),
            cache_default_ttl_ms: default_cache_ttl_ms(),
            cache_max_entries: default_cache_max_entries(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_pool_max_size() -> usize {
    10
}

fn default_pool_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_pool_idle_timeout_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_breaker_failure_threshold() -> usize {
    5
}

fn default_breaker_recovery_timeout_ms() -> u64 {
    30_000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_operation_timeout_ms() -> u64 {
    10_000
}

fn default_cache_ttl_ms() -> u64 {
    60_000
}

fn default_cache_max_entries() -> usize {
    10_000
}

impl ExecutorConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ExecutorConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the executor cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_max_size == 0 {
            return Err(ConfigError::Invalid(
                "pool_max_size must be at least 1".to_string(),
            ));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker_failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "operation_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry_max_delay_ms ({}) is smaller than retry_base_delay_ms ({})",
                self.retry_max_delay_ms, self.retry_base_delay_ms
            )));
        }
        Ok(())
    }

    /// Fast preset: small pool, short timeouts, fail fast
    pub fn fast_preset() -> Self {
        Self {
            pool_max_size: 4,
            pool_acquire_timeout_ms: 250,
            breaker_failure_threshold: 3,
            breaker_recovery_timeout_ms: 5_000,
            retry_max_attempts: 2,
            retry_base_delay_ms: 25,
            operation_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    /// Safe preset: patient timeouts and more attempts
    pub fn safe_preset() -> Self {
        Self {
            pool_acquire_timeout_ms: 30_000,
            breaker_failure_threshold: 10,
            breaker_recovery_timeout_ms: 60_000,
            retry_max_attempts: 5,
            retry_base_delay_ms: 500,
            operation_timeout_ms: 60_000,
            ..Default::default()
        }
    }

    /// Network preset: tuned for flaky remote APIs
    pub fn network_preset() -> Self {
        Self {
            pool_max_size: 32,
            pool_max_lifetime_ms: 1_800_000, // 30 minutes
            retry_max_attempts: 6,
            retry_base_delay_ms: 200,
            retry_jitter: true,
            operation_timeout_ms: 15_000,
            ..Default::default()
        }
    }

    /// Per-attempt deadline
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Resource pool settings
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.pool_max_size,
            acquire_timeout: Duration::from_millis(self.pool_acquire_timeout_ms),
            idle_timeout: non_zero_millis(self.pool_idle_timeout_ms),
            max_lifetime: non_zero_millis(self.pool_max_lifetime_ms),
        }
    }

    /// Circuit breaker settings
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            recovery_timeout: Duration::from_millis(self.breaker_recovery_timeout_ms),
        }
    }

    /// Retry settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: self.retry_jitter,
            retry_on_timeout: self.retry_on_timeout,
            retry_on_resource_failure: self.retry_on_resource_failure,
        }
    }

    /// Response cache settings
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: Duration::from_millis(self.cache_default_ttl_ms),
            max_entries: (self.cache_max_entries > 0).then_some(self.cache_max_entries),
        }
    }
}

/// Zero disables a millisecond limit
fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ExecutorConfig::default();
        assert_eq!(config.pool_max_size, 10);
        assert_eq!(config.breaker_failure_threshold, 5);
        assert_eq!(config.retry_max_attempts, 3);
        assert!(config.retry_jitter);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        for config in [
            ExecutorConfig::fast_preset(),
            ExecutorConfig::safe_preset(),
            ExecutorConfig::network_preset(),
        ] {
            assert!(config.validate().is_ok(), "{:?}", config);
        }
        assert_eq!(ExecutorConfig::fast_preset().retry_max_attempts, 2);
        assert_eq!(ExecutorConfig::network_preset().pool_max_size, 32);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ExecutorConfig = toml::from_str(
            r#"
            pool_max_size = 2
            retry_jitter = false
            log_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.pool_max_size, 2);
        assert!(!config.retry_jitter);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.pool_idle_timeout_ms, 300_000);
    }

    #[test]
    fn test_file_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let config = ExecutorConfig::fast_preset();

        config.to_file(file.path()).unwrap();
        let loaded = ExecutorConfig::from_file(file.path()).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_disabled_limits_survive_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let config = ExecutorConfig {
            pool_idle_timeout_ms: 0,
            pool_max_lifetime_ms: 0,
            cache_max_entries: 0,
            ..Default::default()
        };

        config.to_file(file.path()).unwrap();
        let loaded = ExecutorConfig::from_file(file.path()).unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.pool_config().idle_timeout, None);
        assert_eq!(loaded.pool_config().max_lifetime, None);
        assert_eq!(loaded.cache_config().max_entries, None);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "pool_max_size = 0\n").unwrap();

        let result = ExecutorConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_delay_bounds() {
        let config = ExecutorConfig {
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_core_conversions() {
        let config = ExecutorConfig {
            pool_max_size: 3,
            pool_acquire_timeout_ms: 50,
            pool_idle_timeout_ms: 0,
            breaker_failure_threshold: 2,
            breaker_recovery_timeout_ms: 1_500,
            retry_base_delay_ms: 10,
            retry_jitter: false,
            cache_default_ttl_ms: 250,
            ..Default::default()
        };

        let pool = config.pool_config();
        assert_eq!(pool.max_size, 3);
        assert_eq!(pool.acquire_timeout, Duration::from_millis(50));
        assert_eq!(pool.idle_timeout, None);
        assert_eq!(pool.max_lifetime, None);

        let breaker = config.breaker_config();
        assert_eq!(breaker.failure_threshold, 2);
        assert_eq!(breaker.recovery_timeout, Duration::from_millis(1_500));

        let retry = config.retry_policy();
        assert_eq!(retry.base_delay, Duration::from_millis(10));
        assert!(!retry.jitter);

        assert_eq!(config.cache_config().default_ttl, Duration::from_millis(250));
        assert_eq!(config.cache_config().max_entries, Some(10_000));
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Info.to_tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Debug.to_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
