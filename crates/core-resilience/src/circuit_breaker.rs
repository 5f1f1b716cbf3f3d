//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a
//! destination is experiencing issues. It has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Destination is unhealthy, requests fail immediately
//! - HalfOpen: A single probe request is testing if the destination has recovered
//!
//! State is kept per destination in a [`BreakerRegistry`]; each breaker has its
//! own lock so destinations never contend with each other.

use crate::destination::Destination;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Circuit is half-open, one probe is testing recovery
    HalfOpen,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: usize,
    /// Time since the last failure before an open circuit admits a probe
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of asking the breaker for permission to call the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, call normally
    Pass,
    /// This caller is the single recovery probe
    Probe,
    /// Fail fast
    Rejected,
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    /// Current state of the circuit
    state: CircuitState,
    /// Consecutive failure count since the last success
    consecutive_failures: usize,
    /// When the most recent failure was recorded
    last_failure_at: Option<Instant>,
    /// Whether the half-open probe has been handed out
    probe_in_flight: bool,
    /// Bumped on every state transition; permits remember the value they saw
    generation: u64,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            probe_in_flight: false,
            generation: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub destination: Destination,
    pub state: CircuitState,
    pub consecutive_failures: usize,
    /// Time elapsed since the last recorded failure
    pub last_failure_age: Option<Duration>,
}

/// Circuit breaker guarding a single destination
///
/// # Example
/// ```
/// use bulwark_core_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(
///     "db",
///     CircuitBreakerConfig {
///         failure_threshold: 2,
///         recovery_timeout: Duration::from_secs(30),
///     },
/// );
///
/// assert!(breaker.allow());
/// breaker.on_failure();
/// breaker.on_failure();
///
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(!breaker.allow());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    destination: Destination,
    config: Arc<CircuitBreakerConfig>,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(destination: impl Into<Destination>, config: CircuitBreakerConfig) -> Self {
        Self::with_shared_config(destination.into(), Arc::new(config))
    }

    fn with_shared_config(destination: Destination, config: Arc<CircuitBreakerConfig>) -> Self {
        Self {
            destination,
            config,
            state: Mutex::new(CircuitBreakerState::new()),
        }
    }

    /// Destination guarded by this breaker
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Get current failure count
    pub fn failure_count(&self) -> usize {
        self.state.lock().consecutive_failures
    }

    /// Take a consistent snapshot of the breaker
    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock();
        BreakerSnapshot {
            destination: self.destination.clone(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            last_failure_age: state.last_failure_at.map(|at| at.elapsed()),
        }
    }

    /// Reset the circuit breaker to closed state
    ///
    /// Permits issued before the reset can no longer move the circuit out of
    /// a later open or half-open state.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let generation = state.generation.wrapping_add(1);
        *state = CircuitBreakerState {
            generation,
            ..CircuitBreakerState::new()
        };
        debug!(destination = %self.destination, "circuit breaker reset");
    }

    /// Decide whether a call may proceed.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open and
    /// admits exactly one probe; every other caller is rejected until the probe
    /// reports back.
    pub fn admit(&self) -> Admission {
        self.admit_at_generation().0
    }

    fn admit_at_generation(&self) -> (Admission, u64) {
        let mut state = self.state.lock();

        let current = state.state;
        let admission = match current {
            CircuitState::Closed => Admission::Pass,
            CircuitState::Open => {
                let cooled_down = state
                    .last_failure_at
                    .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout);
                if cooled_down {
                    state.transition(CircuitState::HalfOpen);
                    state.probe_in_flight = true;
                    debug!(destination = %self.destination, "circuit half-open, admitting probe");
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen if !state.probe_in_flight => {
                state.probe_in_flight = true;
                Admission::Probe
            }
            CircuitState::HalfOpen => Admission::Rejected,
        };
        (admission, state.generation)
    }

    /// Whether a call may proceed; see [`admit`](Self::admit)
    pub fn allow(&self) -> bool {
        self.admit() != Admission::Rejected
    }

    /// Admit a call and return a permit that reports its outcome.
    ///
    /// Returns `None` when the circuit rejects the call.
    pub fn try_acquire(self: &Arc<Self>) -> Option<CallPermit> {
        match self.admit_at_generation() {
            (Admission::Rejected, _) => None,
            (admission, generation) => Some(CallPermit {
                breaker: Arc::clone(self),
                probe: admission == Admission::Probe,
                generation,
                settled: false,
            }),
        }
    }

    /// Record a successful call against the current state
    ///
    /// Calls made through a [`CallPermit`] should report via the permit, which
    /// ignores outcomes that arrive after the circuit has moved on.
    pub fn on_success(&self) {
        let mut state = self.state.lock();
        self.close(&mut state);
    }

    /// Record a failed call against the current state
    pub fn on_failure(&self) {
        let mut state = self.state.lock();
        let current = state.state;
        match current {
            CircuitState::Closed => self.count_failure(&mut state),
            CircuitState::HalfOpen => self.reopen(&mut state),
            CircuitState::Open => {
                state.consecutive_failures += 1;
                state.last_failure_at = Some(Instant::now());
            }
        }
    }

    fn settle_success(&self, probe: bool, generation: u64) {
        let mut state = self.state.lock();
        let current = (state.state, state.generation);
        match current.0 {
            CircuitState::Closed => state.consecutive_failures = 0,
            CircuitState::HalfOpen if probe && generation == current.1 => {
                self.close(&mut state)
            }
            // Only the current probe may end an open or half-open period
            CircuitState::Open | CircuitState::HalfOpen => {
                debug!(destination = %self.destination, "ignoring late success");
            }
        }
    }

    fn settle_failure(&self, probe: bool, generation: u64) {
        let mut state = self.state.lock();
        let current = (state.state, state.generation);
        match current.0 {
            CircuitState::Closed => self.count_failure(&mut state),
            CircuitState::HalfOpen if probe && generation == current.1 => {
                self.reopen(&mut state)
            }
            // Late failure: counted, but the cool-down and probe are untouched
            CircuitState::Open | CircuitState::HalfOpen => {
                state.consecutive_failures += 1;
                debug!(destination = %self.destination, "late failure while circuit not closed");
            }
        }
    }

    fn close(&self, state: &mut CircuitBreakerState) {
        let previous = state.state;
        state.consecutive_failures = 0;
        state.probe_in_flight = false;

        if previous != CircuitState::Closed {
            state.transition(CircuitState::Closed);
            info!(destination = %self.destination, "circuit closed, destination recovered");
        }
    }

    fn count_failure(&self, state: &mut CircuitBreakerState) {
        state.consecutive_failures += 1;
        state.last_failure_at = Some(Instant::now());

        if state.consecutive_failures >= self.config.failure_threshold {
            state.transition(CircuitState::Open);
            warn!(
                destination = %self.destination,
                failures = state.consecutive_failures,
                "circuit opened"
            );
        }
    }

    fn reopen(&self, state: &mut CircuitBreakerState) {
        state.consecutive_failures += 1;
        state.last_failure_at = Some(Instant::now());
        state.probe_in_flight = false;
        state.transition(CircuitState::Open);
        warn!(destination = %self.destination, "recovery probe failed, circuit reopened");
    }

    /// Release a half-open probe that ended without an outcome, letting the
    /// next caller probe instead
    pub fn abandon_probe(&self) {
        let generation = self.state.lock().generation;
        self.abandon_probe_at(generation);
    }

    fn abandon_probe_at(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.state == CircuitState::HalfOpen
            && state.probe_in_flight
            && state.generation == generation
        {
            state.probe_in_flight = false;
            debug!(destination = %self.destination, "recovery probe abandoned");
        }
    }
}

/// Permission to make one call through a breaker
///
/// Dropping an unsettled probe permit abandons the probe, so a cancelled call
/// never leaves the circuit stuck half-open.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    /// Breaker generation when the permit was issued
    generation: u64,
    settled: bool,
}

impl CallPermit {
    /// Whether this call is the half-open recovery probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Report success
    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.settle_success(self.probe, self.generation);
    }

    /// Report failure
    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.settle_failure(self.probe, self.generation);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.abandon_probe_at(self.generation);
        }
    }
}

/// Circuit breakers partitioned by destination
///
/// Breakers are created on first use with the registry's configuration.
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    config: Arc<CircuitBreakerConfig>,
    breakers: Arc<DashMap<Destination, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create an empty registry
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            breakers: Arc::new(DashMap::new()),
        }
    }

    /// Get the breaker for a destination, creating it if needed
    pub fn breaker(&self, destination: &Destination) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(destination) {
            return Arc::clone(breaker.value());
        }

        self.breakers
            .entry(destination.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_shared_config(
                    destination.clone(),
                    Arc::clone(&self.config),
                ))
            })
            .clone()
    }

    /// State of a destination's breaker; unknown destinations are closed
    pub fn state(&self, destination: &Destination) -> CircuitState {
        self.breakers
            .get(destination)
            .map_or(CircuitState::Closed, |breaker| breaker.state())
    }

    /// Reset one destination's breaker
    pub fn reset(&self, destination: &Destination) {
        if let Some(breaker) = self.breakers.get(destination) {
            breaker.reset();
        }
    }

    /// Reset every breaker
    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    /// Snapshot every known breaker, ordered by destination
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|breaker| breaker.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.destination.cmp(&b.destination));
        snapshots
    }

    /// Configuration shared by all breakers
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
