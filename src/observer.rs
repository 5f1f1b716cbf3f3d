//! Execution lifecycle events and observers
//!
//! The executor reports every attempt to the observers registered with it.
//! Observers are called synchronously on the call path, so they must be quick:
//! anything slow belongs behind a [`ChannelObserver`]. An observer that returns
//! an error or panics is logged and skipped; it never changes the result of
//! the call that produced the event.

use crate::error::ErrorStage;
use bulwark_core_resilience::Destination;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outcome recorded by an [`ExecutionEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// An attempt is about to invoke the operation
    Started,
    /// The call produced a result
    Succeeded,
    /// An attempt failed, or the call was rejected
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Started => f.write_str("started"),
            Outcome::Succeeded => f.write_str("succeeded"),
            Outcome::Failed => f.write_str("failed"),
        }
    }
}

/// Immutable record of one step in a call's lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Destination the call targeted
    pub destination: String,

    /// Caller-supplied operation name
    pub operation: String,

    pub outcome: Outcome,

    /// Rendered error for failed events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Pipeline stage that produced the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stage: Option<ErrorStage>,

    /// Event timestamp (UTC)
    pub timestamp: DateTime<Utc>,

    /// 0-based attempt index
    pub attempt: u32,

    /// Result was served from the response cache
    #[serde(default)]
    pub cached: bool,
}

impl ExecutionEvent {
    fn new(destination: &Destination, operation: &str, outcome: Outcome, attempt: u32) -> Self {
        Self {
            destination: destination.to_string(),
            operation: operation.to_string(),
            outcome,
            error: None,
            error_stage: None,
            timestamp: Utc::now(),
            attempt,
            cached: false,
        }
    }

    /// An attempt is starting
    pub fn started(destination: &Destination, operation: &str, attempt: u32) -> Self {
        Self::new(destination, operation, Outcome::Started, attempt)
    }

    /// The call succeeded on `attempt`
    pub fn succeeded(destination: &Destination, operation: &str, attempt: u32) -> Self {
        Self::new(destination, operation, Outcome::Succeeded, attempt)
    }

    /// The result was served from the cache
    pub fn cache_hit(destination: &Destination, operation: &str) -> Self {
        let mut event = Self::new(destination, operation, Outcome::Succeeded, 0);
        event.cached = true;
        event
    }

    /// Attempt `attempt` failed at `stage`
    pub fn failed(
        destination: &Destination,
        operation: &str,
        attempt: u32,
        stage: ErrorStage,
        error: impl fmt::Display,
    ) -> Self {
        let mut event = Self::new(destination, operation, Outcome::Failed, attempt);
        event.error = Some(error.to_string());
        event.error_stage = Some(stage);
        event
    }
}

/// Failure reported by an observer
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("Observer channel is full")]
    ChannelFull,

    #[error("Observer channel is closed")]
    ChannelClosed,

    #[error("Observer failed: {0}")]
    Failed(String),
}

/// Receives execution events
///
/// Called on the executor's call path; implementations must not block.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent) -> Result<(), ObserverError>;
}

impl<F> ExecutionObserver for F
where
    F: Fn(&ExecutionEvent) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_event(&self, event: &ExecutionEvent) -> Result<(), ObserverError> {
        self(event)
    }
}

/// Ordered set of observers with failure isolation
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn ExecutionObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; observers are notified in registration order
    pub fn push(&mut self, observer: Arc<dyn ExecutionObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver `event` to every observer
    ///
    /// Returns the number of observers that failed or panicked.
    pub fn notify(&self, event: &ExecutionEvent) -> usize {
        let mut failures = 0;

        for (index, observer) in self.observers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(
                        observer = index,
                        outcome = %event.outcome,
                        "Observer failed: {}",
                        e
                    );
                }
                Err(_) => {
                    failures += 1;
                    warn!(observer = index, outcome = %event.outcome, "Observer panicked");
                }
            }
        }

        failures
    }
}

impl fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn on_event(&self, event: &ExecutionEvent) -> Result<(), ObserverError> {
        match event.outcome {
            Outcome::Started => debug!(
                destination = %event.destination,
                operation = %event.operation,
                attempt = event.attempt,
                "Attempt started"
            ),
            Outcome::Succeeded => info!(
                destination = %event.destination,
                operation = %event.operation,
                attempt = event.attempt,
                cached = event.cached,
                "Operation succeeded"
            ),
            Outcome::Failed => warn!(
                destination = %event.destination,
                operation = %event.operation,
                attempt = event.attempt,
                stage = ?event.error_stage,
                error = event.error.as_deref().unwrap_or(""),
                "Operation failed"
            ),
        }
        Ok(())
    }
}

/// Forwards events onto a bounded channel for an asynchronous collector
///
/// Uses `try_send`, so a full channel drops the event and reports
/// [`ObserverError::ChannelFull`] instead of stalling the caller.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::Sender<ExecutionEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ExecutionEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Wrap an existing sender
    pub fn from_sender(sender: mpsc::Sender<ExecutionEvent>) -> Self {
        Self { sender }
    }
}

impl ExecutionObserver for ChannelObserver {
    fn on_event(&self, event: &ExecutionEvent) -> Result<(), ObserverError> {
        self.sender.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ObserverError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => ObserverError::ChannelClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn db() -> Destination {
        Destination::new("db")
    }

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ExecutionObserver for Recording {
        fn on_event(&self, _event: &ExecutionEvent) -> Result<(), ObserverError> {
            self.log.lock().push(self.name);
            Ok(())
        }
    }

    struct Panicking;

    impl ExecutionObserver for Panicking {
        fn on_event(&self, _event: &ExecutionEvent) -> Result<(), ObserverError> {
            panic!("observer exploded");
        }
    }

    #[test]
    fn test_notify_in_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = ObserverSet::new();
        for name in ["first", "second", "third"] {
            set.push(Arc::new(Recording {
                name,
                log: log.clone(),
            }));
        }

        let failures = set.notify(&ExecutionEvent::started(&db(), "query", 0));

        assert_eq!(failures, 0);
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_observers_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = ObserverSet::new();
        set.push(Arc::new(Panicking));
        set.push(Arc::new(|_: &ExecutionEvent| -> Result<(), ObserverError> {
            Err(ObserverError::Failed("collector down".into()))
        }));
        set.push(Arc::new(Recording {
            name: "last",
            log: log.clone(),
        }));

        let failures = set.notify(&ExecutionEvent::succeeded(&db(), "query", 0));

        assert_eq!(failures, 2);
        assert_eq!(*log.lock(), vec!["last"]);
    }

    #[test]
    fn test_failed_event_carries_stage() {
        let event = ExecutionEvent::failed(&db(), "query", 2, ErrorStage::Timeout, "deadline");

        assert_eq!(event.outcome, Outcome::Failed);
        assert_eq!(event.attempt, 2);
        assert_eq!(event.error.as_deref(), Some("deadline"));
        assert_eq!(event.error_stage, Some(ErrorStage::Timeout));
        assert!(!event.cached);
    }

    #[test]
    fn test_event_serializes_to_json() {
        let event = ExecutionEvent::cache_hit(&db(), "lookup");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["destination"], "db");
        assert_eq!(json["outcome"], "succeeded");
        assert_eq!(json["cached"], true);
        assert!(json.get("error").is_none());

        let parsed: ExecutionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[tokio::test]
    async fn test_channel_observer_never_blocks() {
        let (observer, mut receiver) = ChannelObserver::new(1);

        observer
            .on_event(&ExecutionEvent::started(&db(), "query", 0))
            .unwrap();
        let overflow = observer.on_event(&ExecutionEvent::started(&db(), "query", 1));
        assert!(matches!(overflow, Err(ObserverError::ChannelFull)));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.attempt, 0);

        drop(receiver);
        let closed = observer.on_event(&ExecutionEvent::started(&db(), "query", 2));
        assert!(matches!(closed, Err(ObserverError::ChannelClosed)));
    }

    #[test]
    fn test_tracing_observer_accepts_all_outcomes() {
        let observer = TracingObserver;
        assert!(observer
            .on_event(&ExecutionEvent::started(&db(), "q", 0))
            .is_ok());
        assert!(observer
            .on_event(&ExecutionEvent::failed(&db(), "q", 0, ErrorStage::Pool, "busy"))
            .is_ok());
    }
}
