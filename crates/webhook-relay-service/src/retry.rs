//! # Retry Policy Module
//!
//! Exponential backoff retry logic for transient publish failures.
//!
//! Delays grow as `initial * multiplier^attempt`, capped at `max_delay`, then
//! stretched by additive jitter so simultaneous retriers spread out instead
//! of hammering a recovering dependency in lockstep.

use bus_runtime::BusError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Failure Classification
// ============================================================================

/// Broad class of a publish failure, used to gate retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Operation exceeded its deadline
    Timeout,
    /// Could not reach the dependency
    Connection,
    /// Dependency reached but reported an internal fault
    Server,
    /// The request itself was rejected as invalid
    Client,
}

/// Map a bus error to its failure class
pub fn classify_bus_error(error: &BusError) -> FailureKind {
    match error {
        BusError::Timeout { .. } => FailureKind::Timeout,
        BusError::ConnectionFailed { .. } => FailureKind::Connection,
        BusError::ProviderError { .. } | BusError::TopicFull { .. } => FailureKind::Server,
        BusError::TopicNotFound { .. }
        | BusError::MessageNotFound { .. }
        | BusError::MessageTooLarge { .. }
        | BusError::SerializationError(_)
        | BusError::ValidationError(_) => FailureKind::Client,
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Retry policy configuration for exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial try
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Cap on the computed delay, applied before jitter
    pub max_delay: Duration,

    /// Exponential growth factor, typically 2.0
    pub backoff_multiplier: f64,

    /// Whether to stretch delays by random jitter
    pub use_jitter: bool,

    /// Jitter factor: delays become `base * (1 + random(0, factor))`
    pub jitter_factor: f64,

    /// Retry failures classified as timeouts
    pub retry_timeouts: bool,

    /// Retry failures classified as connection errors
    pub retry_connection_errors: bool,

    /// Retry failures classified as server faults
    pub retry_server_errors: bool,

    /// Retry failures classified as client errors
    ///
    /// Off by default; a rejected request rarely becomes valid by resending.
    pub retry_client_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            backoff_multiplier: 2.0,
            use_jitter: true,
            jitter_factor: 0.25,
            retry_timeouts: true,
            retry_connection_errors: true,
            retry_server_errors: true,
            retry_client_errors: false,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with explicit backoff shape and default class gates
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            ..Self::default()
        }
    }

    /// Disable jitter, mainly for deterministic tests
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Set the jitter factor, clamped to [0.0, 1.0]
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a retry attempt (0-based)
    ///
    /// The cap applies to the exponential base; jitter then stretches the
    /// result into `[base, base * (1 + jitter_factor)]`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.use_jitter && self.jitter_factor > 0.0 {
            let stretch = rand::thread_rng().gen_range(0.0..=self.jitter_factor);
            capped_secs * (1.0 + stretch)
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }

    /// Check whether another retry is allowed at this attempt number
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Check whether this failure class is retried at all
    pub fn retries_kind(&self, kind: FailureKind) -> bool {
        match kind {
            FailureKind::Timeout => self.retry_timeouts,
            FailureKind::Connection => self.retry_connection_errors,
            FailureKind::Server => self.retry_server_errors,
            FailureKind::Client => self.retry_client_errors,
        }
    }

    /// Total delivery attempts including the initial try
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts + 1
    }
}

// ============================================================================
// Retry State
// ============================================================================

/// Tracks progress through a retry sequence
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Current retry attempt (0-based)
    pub attempt: u32,
}

impl RetryState {
    /// Create state at the first retry
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to the next retry attempt
    pub fn next_attempt(&mut self) {
        self.attempt += 1;
    }

    /// Delay for the current attempt under a policy
    pub fn get_delay(&self, policy: &RetryPolicy) -> Duration {
        policy.calculate_delay(self.attempt)
    }

    /// Whether the policy allows the current attempt
    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        policy.should_retry(self.attempt)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
