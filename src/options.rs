//! Per-call options for [`ResilientExecutor::run`](crate::ResilientExecutor::run)

use bulwark_core_resilience::RetryPolicy;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Options for a single call
///
/// Anything left unset falls back to the executor's defaults. Calls are never
/// cached unless a cache key is supplied.
///
/// # Example
///
/// ```
/// use bulwark::RunOptions;
/// use std::time::Duration;
///
/// let options = RunOptions::new("get_user")
///     .cache_key("user:42")
///     .cache_ttl(Duration::from_secs(30))
///     .timeout(Duration::from_secs(2));
/// assert_eq!(options.operation(), "get_user");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    operation: String,
    cache_key: Option<String>,
    cache_ttl: Option<Duration>,
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    cancellation: Option<CancellationToken>,
}

impl RunOptions {
    /// Options for the named operation
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Mark the call cacheable under `key`
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// TTL for the cached result (defaults to the cache's default TTL)
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Per-attempt deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replace the executor's retry policy for this call
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Cancel the call when `token` is cancelled
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn operation(&self) -> &str {
        if self.operation.is_empty() {
            "operation"
        } else {
            &self.operation
        }
    }

    pub fn get_cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    pub fn get_cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn get_retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn get_cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }
}

impl From<&str> for RunOptions {
    fn from(operation: &str) -> Self {
        Self::new(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = RunOptions::default();
        assert_eq!(options.operation(), "operation");
        assert!(options.get_cache_key().is_none());
        assert!(options.get_timeout().is_none());
        assert!(options.get_retry().is_none());
        assert!(options.get_cancellation().is_none());
    }

    #[test]
    fn test_builder() {
        let token = CancellationToken::new();
        let options = RunOptions::new("list_orders")
            .cache_key("orders:7")
            .cache_ttl(Duration::from_secs(5))
            .timeout(Duration::from_millis(250))
            .retry(RetryPolicy::no_retry())
            .cancellation(token.clone());

        assert_eq!(options.operation(), "list_orders");
        assert_eq!(options.get_cache_key(), Some("orders:7"));
        assert_eq!(options.get_cache_ttl(), Some(Duration::from_secs(5)));
        assert_eq!(options.get_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(options.get_retry().map(|p| p.max_attempts), Some(1));

        token.cancel();
        assert!(options.get_cancellation().unwrap().is_cancelled());
    }
}
