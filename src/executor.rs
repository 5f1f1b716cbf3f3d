//! Resilient executor
//!
//! Composes the response cache, circuit breaker, resource pool and retry
//! policy into a single call path:
//!
//! ```text
//! run ─► cache hit? ──yes──► result
//!          │ no
//!          ▼
//!        breaker admits? ──no──► CircuitOpen
//!          │ yes
//!          ▼
//!        pool acquire ─► operation (under timeout) ─► release / discard
//!          │
//!          ├─ success ─► breaker success ─► cache store ─► result
//!          └─ failure ─► breaker failure ─► retry? ─► backoff ─► loop
//! ```
//!
//! Every attempt is reported to the registered observers.

use crate::config::{ConfigError, ExecutorConfig};
use crate::error::ExecutorError;
use crate::observer::{ExecutionEvent, ExecutionObserver, ObserverSet};
use crate::options::RunOptions;
use bulwark_core_resilience::{
    BreakerRegistry, CacheConfig, CircuitBreakerConfig, Destination, PoolConfig, ResourceFactory,
    ResourcePool, ResponseCache, RetryPolicy, Retryable,
};
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Type-erased cached result
pub type CachedValue = Arc<dyn Any + Send + Sync>;

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs caller-supplied operations against pooled resources with circuit
/// breaking, retries and optional response caching
///
/// Cloning is cheap; clones share all state.
///
/// # Example
///
/// ```no_run
/// use bulwark::{factory_fn, Destination, FactoryError, ResilienceError, ResilientExecutor, RunOptions};
/// use std::sync::Arc;
///
/// # async fn example() {
/// let executor: ResilientExecutor<String> = ResilientExecutor::builder(Arc::new(factory_fn(|destination: Destination| async move {
///     Ok::<_, FactoryError>(format!("client for {destination}"))
/// })))
/// .build();
///
/// let result = executor
///     .run(
///         "users-api",
///         |client: &mut String| {
///             let request = format!("GET /users/42 via {client}");
///             Box::pin(async move { Ok::<_, ResilienceError>(request) })
///         },
///         RunOptions::new("get_user").cache_key("user:42"),
///     )
///     .await;
/// # let _ = result;
/// # }
/// ```
pub struct ResilientExecutor<R> {
    pool: ResourcePool<R>,
    breakers: BreakerRegistry,
    cache: Arc<ResponseCache<CachedValue>>,
    retry: RetryPolicy,
    operation_timeout: Duration,
    observers: ObserverSet,
}

impl<R> Clone for ResilientExecutor<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            breakers: self.breakers.clone(),
            cache: Arc::clone(&self.cache),
            retry: self.retry.clone(),
            operation_timeout: self.operation_timeout,
            observers: self.observers.clone(),
        }
    }
}

impl<R> fmt::Debug for ResilientExecutor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("retry", &self.retry)
            .field("operation_timeout", &self.operation_timeout)
            .field("cached_entries", &self.cache.len())
            .field("observers", &self.observers)
            .finish()
    }
}

impl<R: Send + 'static> ResilientExecutor<R> {
    /// Start building an executor around a resource factory
    pub fn builder(factory: Arc<dyn ResourceFactory<R>>) -> ExecutorBuilder<R> {
        ExecutorBuilder::new(factory)
    }

    /// Build an executor from a validated configuration
    pub fn from_config(
        factory: Arc<dyn ResourceFactory<R>>,
        config: &ExecutorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::builder(factory)
            .pool_config(config.pool_config())
            .breaker_config(config.breaker_config())
            .retry_policy(config.retry_policy())
            .cache_config(config.cache_config())
            .operation_timeout(config.operation_timeout())
            .build())
    }

    /// Run `operation` against a resource for `destination`
    ///
    /// The operation receives exclusive access to a pooled resource for the
    /// duration of one attempt and may be invoked again on retryable failures.
    /// An operation error that invalidates its resource (see
    /// [`Retryable::invalidates_resource`]) discards the resource instead of
    /// returning it to the pool; so does a timeout or cancellation.
    pub async fn run<T, E, F>(
        &self,
        destination: impl Into<Destination>,
        mut operation: F,
        options: RunOptions,
    ) -> Result<T, ExecutorError<E>>
    where
        T: Clone + Send + Sync + 'static,
        E: Retryable + fmt::Display,
        F: for<'a> FnMut(&'a mut R) -> BoxFuture<'a, Result<T, E>>,
    {
        let destination = destination.into();
        let name = options.operation();
        let policy = options.get_retry().unwrap_or(&self.retry);
        let timeout = options.get_timeout().unwrap_or(self.operation_timeout);
        let cancel = options.get_cancellation().cloned().unwrap_or_default();

        if let Some(key) = options.get_cache_key() {
            if let Some(value) = self.cached::<T>(key) {
                debug!(destination = %destination, operation = name, key, "cache hit");
                self.observers
                    .notify(&ExecutionEvent::cache_hit(&destination, name));
                return Ok(value);
            }
        }

        let breaker = self.breakers.breaker(&destination);
        let mut attempt: u32 = 0;

        loop {
            let Some(permit) = breaker.try_acquire() else {
                let error = ExecutorError::CircuitOpen {
                    destination: destination.clone(),
                };
                self.notify_failure(&destination, name, attempt, &error);
                return Err(error);
            };

            if cancel.is_cancelled() {
                return Err(self.cancelled(&destination, name, attempt));
            }

            debug!(destination = %destination, operation = name, attempt, "attempt started");
            self.observers
                .notify(&ExecutionEvent::started(&destination, name, attempt));

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = self.attempt(&destination, &mut operation, timeout) => Some(outcome),
            };

            // Dropping an unsettled probe permit abandons the probe
            let Some(outcome) = outcome else {
                return Err(self.cancelled(&destination, name, attempt));
            };

            let error = match outcome {
                Ok(value) => {
                    permit.succeed();
                    if let Some(key) = options.get_cache_key() {
                        let ttl = options
                            .get_cache_ttl()
                            .unwrap_or(self.cache.config().default_ttl);
                        let cached: CachedValue = Arc::new(value.clone());
                        self.cache.put(key, cached, ttl);
                    }
                    self.observers
                        .notify(&ExecutionEvent::succeeded(&destination, name, attempt));
                    return Ok(value);
                }
                Err(error) => error,
            };

            permit.fail();
            self.notify_failure(&destination, name, attempt, &error);

            if !policy.is_retryable(error.failure_kind()) {
                return Err(error);
            }

            if !policy.has_attempts_after(attempt) {
                warn!(
                    destination = %destination,
                    operation = name,
                    attempts = attempt + 1,
                    "retries exhausted"
                );
                return Err(ExecutorError::RetriesExhausted {
                    destination,
                    attempts: attempt + 1,
                    last: Box::new(error),
                });
            }

            let delay = policy.delay_for(attempt);
            debug!(
                destination = %destination,
                operation = name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after backoff"
            );

            let slept = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            };
            if !slept {
                return Err(self.cancelled(&destination, name, attempt));
            }

            attempt += 1;
        }
    }

    /// One attempt: acquire, invoke under the deadline, then release or discard
    async fn attempt<T, E, F>(
        &self,
        destination: &Destination,
        operation: &mut F,
        timeout: Duration,
    ) -> Result<T, ExecutorError<E>>
    where
        E: Retryable,
        F: for<'a> FnMut(&'a mut R) -> BoxFuture<'a, Result<T, E>>,
    {
        let mut resource = self
            .pool
            .acquire(destination)
            .await
            .map_err(|e| ExecutorError::from_resilience(destination, e))?;

        let result = tokio::time::timeout(timeout, operation(&mut *resource)).await;

        match result {
            Ok(Ok(value)) => {
                resource.release();
                Ok(value)
            }
            Ok(Err(error)) => {
                if error.invalidates_resource() {
                    resource.discard();
                } else {
                    resource.release();
                }
                Err(ExecutorError::Operation(error))
            }
            Err(_) => {
                // Completion state unknown
                resource.discard();
                Err(ExecutorError::OperationTimeout {
                    destination: destination.clone(),
                    timeout,
                })
            }
        }
    }

    fn cached<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.cache.get(key)?.downcast_ref::<T>().cloned()
    }

    fn notify_failure<E: fmt::Display>(
        &self,
        destination: &Destination,
        name: &str,
        attempt: u32,
        error: &ExecutorError<E>,
    ) {
        self.observers.notify(&ExecutionEvent::failed(
            destination,
            name,
            attempt,
            error.stage(),
            error,
        ));
    }

    fn cancelled<E: fmt::Display>(
        &self,
        destination: &Destination,
        name: &str,
        attempt: u32,
    ) -> ExecutorError<E> {
        debug!(destination = %destination, operation = name, attempt, "call cancelled");
        let error = ExecutorError::Cancelled {
            destination: destination.clone(),
        };
        self.notify_failure(destination, name, attempt, &error);
        error
    }

    /// Resource pool shared by all calls
    pub fn pool(&self) -> &ResourcePool<R> {
        &self.pool
    }

    /// Circuit breakers, one per destination
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Response cache
    pub fn cache(&self) -> &Arc<ResponseCache<CachedValue>> {
        &self.cache
    }

    /// Drop a cached response
    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.remove(key).is_some()
    }

    /// Start a background task purging expired cache entries
    pub fn spawn_cache_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        self.cache.spawn_sweeper(interval)
    }

    /// Default retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Default per-attempt deadline
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Registered observers
    pub fn observers(&self) -> &ObserverSet {
        &self.observers
    }
}

/// Builder for [`ResilientExecutor`]
pub struct ExecutorBuilder<R> {
    factory: Arc<dyn ResourceFactory<R>>,
    pool_config: PoolConfig,
    breaker_config: CircuitBreakerConfig,
    cache_config: CacheConfig,
    retry: RetryPolicy,
    operation_timeout: Duration,
    observers: ObserverSet,
}

impl<R: Send + 'static> ExecutorBuilder<R> {
    fn new(factory: Arc<dyn ResourceFactory<R>>) -> Self {
        Self {
            factory,
            pool_config: PoolConfig::default(),
            breaker_config: CircuitBreakerConfig::default(),
            cache_config: CacheConfig::default(),
            retry: RetryPolicy::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            observers: ObserverSet::new(),
        }
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    pub fn breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Default per-attempt deadline
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Register an observer; observers are notified in registration order
    pub fn observer(mut self, observer: impl ExecutionObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Register a shared observer
    pub fn shared_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> ResilientExecutor<R> {
        ResilientExecutor {
            pool: ResourcePool::new(self.factory, self.pool_config),
            breakers: BreakerRegistry::new(self.breaker_config),
            cache: Arc::new(ResponseCache::new(self.cache_config)),
            retry: self.retry,
            operation_timeout: self.operation_timeout,
            observers: self.observers,
        }
    }
}
