//! Bulwark Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks for calling an unreliable external
//! dependency safely. It includes:
//!
//! - **Resource Pool**: Bounded, per-destination reuse of expensive resources (connections, clients)
//! - **Circuit Breaker**: Per-destination fail-fast guard with a single half-open recovery probe
//! - **Retry Policy**: Exponential backoff with optional jitter and error classification
//! - **Response Cache**: Short-lived memoization of idempotent read results
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - The resources being pooled (databases, HTTP clients, sockets)
//! - How results are observed, logged or reported
//! - Application-specific concerns
//!
//! State is partitioned by [`Destination`] so unrelated dependencies never
//! contend for the same lock.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Response Cache                    │  ← Skip the call entirely
//! │  (TTL entries, lazy eviction)           │
//! └─────────────┬───────────────────────────┘
//!               │ miss
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Tracks failures, opens on threshold)  │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Resource Pool                     │  ← Resource efficiency
//! │  (Reuse resources, bounded per dest)    │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         External Dependency
//!        (Database, HTTP API)
//!               │
//!          On failure:
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry Policy                      │  ← Back off and try again
//! │  (Exponential backoff, jitter)          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage Example
//!
//! ## Circuit Breaker
//!
//! ```
//! use bulwark_core_resilience::{BreakerRegistry, CircuitBreakerConfig, Destination};
//! use std::time::Duration;
//!
//! let registry = BreakerRegistry::new(CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     recovery_timeout: Duration::from_secs(60),
//! });
//!
//! let breaker = registry.breaker(&Destination::new("db"));
//! if let Some(permit) = breaker.try_acquire() {
//!     // Call the dependency, then report the outcome
//!     permit.succeed();
//! }
//! ```
//!
//! ## Resource Pool
//!
//! ```no_run
//! use bulwark_core_resilience::{factory_fn, Destination, FactoryError, PoolConfig, ResourcePool};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), bulwark_core_resilience::ResilienceError> {
//! let factory = factory_fn(|destination: Destination| async move {
//!     Ok::<_, FactoryError>(format!("client for {destination}"))
//! });
//! let pool = ResourcePool::new(Arc::new(factory), PoolConfig::default());
//!
//! let client = pool.acquire(&Destination::new("api")).await?;
//! // Use client...
//! client.release();
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod destination;
pub mod error;
pub mod resource_pool;
pub mod response_cache;
pub mod retry;

// Re-export main types for convenience
pub use circuit_breaker::{
    Admission, BreakerRegistry, BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakerConfig,
    CircuitState,
};
pub use destination::Destination;
pub use error::{FactoryError, FailureKind, ResilienceError, Retryable};
pub use resource_pool::{
    factory_fn, FnFactory, PoolConfig, PoolStats, PooledResource, ResourceFactory, ResourcePool,
};
pub use response_cache::{CacheConfig, ResponseCache};
pub use retry::RetryPolicy;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use bulwark_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig};
    pub use super::destination::Destination;
    pub use super::error::{FactoryError, FailureKind, ResilienceError, Retryable};
    pub use super::resource_pool::{factory_fn, PoolConfig, ResourceFactory, ResourcePool};
    pub use super::response_cache::{CacheConfig, ResponseCache};
    pub use super::retry::RetryPolicy;
}
