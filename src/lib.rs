/*!
 * Bulwark - Resilient Operation Executor
 *
 * Mediates calls to unreliable external dependencies with:
 * - Per-destination resource pooling with bounded concurrency
 * - Circuit breaking with a single half-open recovery probe
 * - Retries with exponential backoff and jitter
 * - Optional TTL caching of idempotent reads
 * - Lifecycle events for metrics and logging collectors
 */

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod observer;
pub mod options;

// Re-export commonly used types
pub use bulwark_core_resilience::{
    factory_fn, BreakerRegistry, BreakerSnapshot, CacheConfig, CircuitBreakerConfig,
    CircuitState, Destination, FactoryError, FailureKind, PoolConfig, PoolStats, PooledResource,
    ResilienceError, ResourceFactory, ResourcePool, ResponseCache, RetryPolicy, Retryable,
};
pub use config::{ConfigError, ExecutorConfig, LogLevel};
pub use error::{ErrorStage, ExecutorError};
pub use executor::{CachedValue, ExecutorBuilder, ResilientExecutor};
pub use observer::{
    ChannelObserver, ExecutionEvent, ExecutionObserver, ObserverError, ObserverSet, Outcome,
    TracingObserver,
};
pub use options::RunOptions;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
