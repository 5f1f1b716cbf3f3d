//! Error types and failure classification for the resilience primitives

use crate::destination::Destination;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Error returned by resource factories
pub type FactoryError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in resilience operations
#[derive(Debug, Error, Clone)]
pub enum ResilienceError {
    /// Circuit breaker is open, rejecting requests
    #[error("Circuit breaker for {0} is open, rejecting requests")]
    CircuitOpen(Destination),

    /// No resource became available within the acquire timeout
    #[error("Resource pool for {destination} is exhausted after waiting {waited:?}")]
    PoolExhausted {
        destination: Destination,
        waited: Duration,
    },

    /// The resource factory failed
    #[error("Failed to create resource for {destination}: {reason}")]
    ResourceCreation {
        destination: Destination,
        reason: String,
    },

    /// Timeout occurred
    #[error("Operation timeout after {0:?}")]
    Timeout(Duration),

    /// Transient error that may be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),
}

/// How a failure should be treated by a retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Temporary condition, worth another attempt
    Transient,
    /// The attempt exceeded its deadline
    Timeout,
    /// The dependency could not be reached while creating a resource
    ResourceCreation,
    /// Retrying cannot help
    Terminal,
}

/// Classification of an error for retry and resource bookkeeping
///
/// Operation error types implement this so the executor can decide whether a
/// failed attempt is worth repeating and whether the resource it ran on can be
/// handed to the next caller.
pub trait Retryable {
    /// Classify this failure
    fn failure_kind(&self) -> FailureKind;

    /// Whether the resource used by the failed attempt is broken and must be
    /// discarded instead of returned to the pool
    fn invalidates_resource(&self) -> bool {
        false
    }
}

impl Retryable for ResilienceError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            ResilienceError::Transient(_) => FailureKind::Transient,
            ResilienceError::Timeout(_) => FailureKind::Timeout,
            ResilienceError::ResourceCreation { .. } => FailureKind::ResourceCreation,
            ResilienceError::CircuitOpen(_)
            | ResilienceError::PoolExhausted { .. }
            | ResilienceError::Permanent(_) => FailureKind::Terminal,
        }
    }

    fn invalidates_resource(&self) -> bool {
        matches!(self, ResilienceError::Timeout(_))
    }
}

impl Retryable for io::Error {
    fn failure_kind(&self) -> FailureKind {
        use io::ErrorKind::*;
        match self.kind() {
            TimedOut => FailureKind::Timeout,
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected
            | BrokenPipe | Interrupted | WouldBlock => FailureKind::Transient,
            _ => FailureKind::Terminal,
        }
    }

    fn invalidates_resource(&self) -> bool {
        use io::ErrorKind::*;
        matches!(
            self.kind(),
            ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe | UnexpectedEof
        )
    }
}
