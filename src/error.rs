/*!
 * Error types for the resilient executor
 */

use bulwark_core_resilience::{Destination, FailureKind, ResilienceError, Retryable};
use std::fmt;
use std::time::Duration;

/// Stage of the execution pipeline that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    /// Rejected by the circuit breaker
    Circuit,
    /// No pooled resource became available
    Pool,
    /// The resource factory failed
    ResourceCreation,
    /// An attempt exceeded its deadline
    Timeout,
    /// The caller cancelled the call
    Cancelled,
    /// The retry policy gave up
    RetriesExhausted,
    /// The operation's own error
    Operation,
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorStage::Circuit => "circuit",
            ErrorStage::Pool => "pool",
            ErrorStage::ResourceCreation => "resource_creation",
            ErrorStage::Timeout => "timeout",
            ErrorStage::Cancelled => "cancelled",
            ErrorStage::RetriesExhausted => "retries_exhausted",
            ErrorStage::Operation => "operation",
        };
        f.write_str(name)
    }
}

/// Error returned by [`ResilientExecutor::run`](crate::ResilientExecutor::run)
///
/// `E` is the operation's own error type, passed through unmodified in
/// [`ExecutorError::Operation`] when no resilience stage intercepts it.
#[derive(Debug)]
pub enum ExecutorError<E> {
    /// The destination's circuit is open; the operation was not invoked
    CircuitOpen { destination: Destination },

    /// No pooled resource became available within the acquire timeout
    PoolExhausted {
        destination: Destination,
        waited: Duration,
    },

    /// A resource for the destination could not be created
    ResourceCreationFailed {
        destination: Destination,
        reason: String,
    },

    /// An attempt exceeded its deadline
    OperationTimeout {
        destination: Destination,
        timeout: Duration,
    },

    /// The caller cancelled the call
    Cancelled { destination: Destination },

    /// Every permitted attempt failed with a retryable error
    RetriesExhausted {
        destination: Destination,
        attempts: u32,
        last: Box<ExecutorError<E>>,
    },

    /// The operation's own error
    Operation(E),
}

impl<E> ExecutorError<E> {
    /// Stage that produced this error
    pub fn stage(&self) -> ErrorStage {
        match self {
            ExecutorError::CircuitOpen { .. } => ErrorStage::Circuit,
            ExecutorError::PoolExhausted { .. } => ErrorStage::Pool,
            ExecutorError::ResourceCreationFailed { .. } => ErrorStage::ResourceCreation,
            ExecutorError::OperationTimeout { .. } => ErrorStage::Timeout,
            ExecutorError::Cancelled { .. } => ErrorStage::Cancelled,
            ExecutorError::RetriesExhausted { .. } => ErrorStage::RetriesExhausted,
            ExecutorError::Operation(_) => ErrorStage::Operation,
        }
    }

    /// Destination named by the error, if the error came from a resilience stage
    pub fn destination(&self) -> Option<&Destination> {
        match self {
            ExecutorError::CircuitOpen { destination }
            | ExecutorError::PoolExhausted { destination, .. }
            | ExecutorError::ResourceCreationFailed { destination, .. }
            | ExecutorError::OperationTimeout { destination, .. }
            | ExecutorError::Cancelled { destination }
            | ExecutorError::RetriesExhausted { destination, .. } => Some(destination),
            ExecutorError::Operation(_) => None,
        }
    }

    /// The operation error, unwrapping a retries-exhausted wrapper
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            ExecutorError::Operation(e) => Some(e),
            ExecutorError::RetriesExhausted { last, .. } => last.operation_error(),
            _ => None,
        }
    }

    /// Check if this is a circuit-open rejection
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ExecutorError::CircuitOpen { .. })
    }

    /// Build from a pool or breaker error
    pub(crate) fn from_resilience(destination: &Destination, error: ResilienceError) -> Self {
        match error {
            ResilienceError::CircuitOpen(destination) => ExecutorError::CircuitOpen { destination },
            ResilienceError::PoolExhausted {
                destination,
                waited,
            } => ExecutorError::PoolExhausted {
                destination,
                waited,
            },
            ResilienceError::ResourceCreation {
                destination,
                reason,
            } => ExecutorError::ResourceCreationFailed {
                destination,
                reason,
            },
            ResilienceError::Timeout(timeout) => ExecutorError::OperationTimeout {
                destination: destination.clone(),
                timeout,
            },
            other => ExecutorError::ResourceCreationFailed {
                destination: destination.clone(),
                reason: other.to_string(),
            },
        }
    }
}

impl<E: Retryable> Retryable for ExecutorError<E> {
    fn failure_kind(&self) -> FailureKind {
        match self {
            ExecutorError::OperationTimeout { .. } => FailureKind::Timeout,
            ExecutorError::ResourceCreationFailed { .. } => FailureKind::ResourceCreation,
            ExecutorError::Operation(e) => e.failure_kind(),
            ExecutorError::CircuitOpen { .. }
            | ExecutorError::PoolExhausted { .. }
            | ExecutorError::Cancelled { .. }
            | ExecutorError::RetriesExhausted { .. } => FailureKind::Terminal,
        }
    }

    fn invalidates_resource(&self) -> bool {
        match self {
            ExecutorError::OperationTimeout { .. } | ExecutorError::Cancelled { .. } => true,
            ExecutorError::Operation(e) => e.invalidates_resource(),
            _ => false,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ExecutorError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::CircuitOpen { destination } => {
                write!(f, "Circuit breaker for {} is open", destination)
            }
            ExecutorError::PoolExhausted {
                destination,
                waited,
            } => write!(
                f,
                "Resource pool for {} exhausted after waiting {:?}",
                destination, waited
            ),
            ExecutorError::ResourceCreationFailed {
                destination,
                reason,
            } => write!(f, "Failed to create resource for {}: {}", destination, reason),
            ExecutorError::OperationTimeout {
                destination,
                timeout,
            } => write!(f, "Operation on {} timed out after {:?}", destination, timeout),
            ExecutorError::Cancelled { destination } => {
                write!(f, "Operation on {} was cancelled", destination)
            }
            ExecutorError::RetriesExhausted {
                destination,
                attempts,
                last,
            } => write!(
                f,
                "Retries exhausted for {} after {} attempts: {}",
                destination, attempts, last
            ),
            ExecutorError::Operation(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ExecutorError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecutorError::RetriesExhausted { last, .. } => Some(last.as_ref()),
            ExecutorError::Operation(e) => e.source(),
            _ => None,
        }
    }
}
