//! Retry policy with exponential backoff
//!
//! The policy answers two questions for a failed attempt: should it be tried
//! again, and how long to wait first. The delay for attempt `n` (0-based) is
//! `base_delay * 2^n`, capped at `max_delay`. With jitter enabled the actual
//! delay is drawn uniformly from `[0, delay]` so concurrent callers do not
//! retry in lockstep.
//!
//! # Example
//!
//! ```
//! use bulwark_core_resilience::{ResilienceError, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy {
//!     max_attempts: 3,
//!     base_delay: Duration::from_millis(10),
//!     jitter: false,
//!     ..Default::default()
//! };
//!
//! assert_eq!(policy.delay_for(0), Duration::from_millis(10));
//! assert_eq!(policy.delay_for(1), Duration::from_millis(20));
//!
//! let transient = ResilienceError::Transient("connection reset".to_string());
//! assert!(policy.should_retry(0, &transient));
//! assert!(!policy.should_retry(2, &transient)); // third attempt was the last
//! ```

use crate::error::{FailureKind, Retryable};
use rand::Rng;
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Randomize delays in `[0, delay]`
    pub jitter: bool,

    /// Retry attempts that exceeded their deadline
    pub retry_on_timeout: bool,

    /// Retry when a resource for the destination could not be created
    pub retry_on_resource_failure: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: true,
            retry_on_timeout: true,
            retry_on_resource_failure: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Whether the failure classification is worth another attempt
    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        match kind {
            FailureKind::Transient => true,
            FailureKind::Timeout => self.retry_on_timeout,
            FailureKind::ResourceCreation => self.retry_on_resource_failure,
            FailureKind::Terminal => false,
        }
    }

    /// Whether attempt `attempt` (0-based) that failed with `error` should be
    /// followed by another attempt
    pub fn should_retry<E: Retryable + ?Sized>(&self, attempt: u32, error: &E) -> bool {
        self.has_attempts_after(attempt) && self.is_retryable(error.failure_kind())
    }

    /// Whether attempts remain after attempt `attempt` (0-based)
    pub fn has_attempts_after(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }

    /// Backoff before the attempt following attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter && !delay.is_zero() {
            let nanos = delay.as_nanos().min(u64::MAX as u128) as u64;
            Duration::from_nanos(rand::rng().random_range(0..=nanos))
        } else {
            delay
        }
    }

    /// Exponential delay without jitter, capped at `max_delay`
    fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
