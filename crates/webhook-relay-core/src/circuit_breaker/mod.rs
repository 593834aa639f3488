//! Circuit breaker resilience pattern for downstream dependencies.
//!
//! Protects bus publishing and other external calls from cascading failures
//! by failing fast once a dependency shows a sustained error rate.
//!
//! # Circuit Breaker States
//!
//! - **Closed**: Normal operation, outcomes recorded in a sliding window
//! - **Open**: Fast-fail mode, requests rejected until the cooldown elapses
//! - **Half-Open**: Testing recovery, limited probe requests allowed
//! - **Disabled**: Pass-through, outcomes still recorded but never trips
//! - **ForcedOpen**: Administratively held open until reset

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::Timestamp;

mod breaker;
pub use breaker::DefaultCircuitBreaker;

// ============================================================================
// Circuit Breaker Trait
// ============================================================================

/// Circuit breaker protection for external operations.
///
/// # Type Parameters
///
/// - `T`: Success result type
/// - `E`: Operation error type
#[async_trait]
pub trait CircuitBreaker<T, E>: Send + Sync {
    /// Execute an operation under circuit protection.
    ///
    /// # Behavior
    ///
    /// - **Closed/Disabled**: Execute, record outcome
    /// - **Open/ForcedOpen**: Reject immediately with `CircuitOpen`
    /// - **Half-Open**: Allow a bounded number of concurrent probes
    async fn call<F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send;

    /// Get current circuit state.
    fn state(&self) -> CircuitState;

    /// Get circuit metrics and statistics.
    fn metrics(&self) -> CircuitMetrics;

    /// Reset circuit to closed state, clearing the outcome window.
    ///
    /// Administrative operation. Also the only way out of `ForcedOpen`
    /// and `Disabled`.
    fn reset(&self);

    /// Hold the circuit open regardless of outcomes.
    fn force_open(&self);

    /// Bypass circuit protection while still recording outcomes.
    fn disable(&self);

    /// Check if circuit currently allows requests.
    fn is_healthy(&self) -> bool {
        self.state().allows_requests()
    }
}

// ============================================================================
// Circuit State
// ============================================================================

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, tracking outcomes.
    Closed,

    /// Fast-fail mode after the failure rate tripped the circuit.
    Open,

    /// Testing recovery with limited probe requests.
    HalfOpen,

    /// Protection bypassed by an administrator.
    Disabled,

    /// Held open by an administrator until reset.
    ForcedOpen,
}

impl CircuitState {
    /// Check if requests are allowed in the current state.
    pub fn allows_requests(&self) -> bool {
        matches!(self, Self::Closed | Self::HalfOpen | Self::Disabled)
    }

    /// Check if the circuit is reacting to failures.
    pub fn is_failure_state(&self) -> bool {
        matches!(self, Self::Open | Self::HalfOpen | Self::ForcedOpen)
    }
}

// ============================================================================
// Circuit Breaker Configuration
// ============================================================================

/// Configuration for circuit breaker behavior.
///
/// The circuit trips on outcome rates over a count-based sliding window
/// rather than consecutive failures, so a burst of successes cannot mask
/// a sustained failure rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Dependency name for identification in logs and metrics.
    pub name: String,

    /// Number of most recent call outcomes retained in the window.
    pub sliding_window_size: usize,

    /// Minimum recorded calls before rates are evaluated.
    ///
    /// Below this the circuit never trips, avoiding decisions made on
    /// a handful of samples.
    pub minimum_calls: u32,

    /// Failure rate (0.0 to 1.0) at or above which the circuit trips.
    pub failure_rate_threshold: f64,

    /// Slow-call rate (0.0 to 1.0) at or above which the circuit trips.
    pub slow_call_rate_threshold: f64,

    /// Duration at or above which a successful call counts as slow.
    pub slow_call_duration: Duration,

    /// Time the circuit stays open before allowing probe requests.
    pub recovery_timeout: Duration,

    /// Consecutive probe successes needed to close from half-open.
    pub success_threshold: u32,

    /// Timeout applied to each protected operation.
    pub operation_timeout: Duration,

    /// Maximum concurrent probe requests in half-open state.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            sliding_window_size: 100,
            minimum_calls: 10,
            failure_rate_threshold: 0.5,
            slow_call_rate_threshold: 0.8,
            slow_call_duration: Duration::from_secs(5),
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 3,
            operation_timeout: Duration::from_secs(10),
            half_open_max_requests: 5,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create configuration with a dependency name and defaults otherwise.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Circuit Metrics
// ============================================================================

/// Metrics and statistics for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitMetrics {
    /// Current circuit state.
    pub state: CircuitState,

    /// Total number of calls attempted, including rejections.
    pub total_requests: u64,

    /// Number of successful calls.
    pub successful_requests: u64,

    /// Number of failed calls, including timeouts.
    pub failed_requests: u64,

    /// Number of calls rejected while the circuit was open.
    pub rejected_requests: u64,

    /// Number of outcomes currently in the sliding window.
    pub window_size: usize,

    /// Failure rate over the sliding window (0.0 to 1.0).
    pub failure_rate: f64,

    /// Slow-call rate over the sliding window (0.0 to 1.0).
    pub slow_call_rate: f64,

    /// Time the circuit last changed state.
    pub last_state_change: Timestamp,

    /// Time the circuit will next attempt recovery, when open.
    pub next_recovery_attempt: Option<Timestamp>,
}

impl CircuitMetrics {
    /// Lifetime success rate, 1.0 when nothing has been recorded.
    pub fn success_rate(&self) -> f64 {
        let completed = self.successful_requests + self.failed_requests;
        if completed == 0 {
            1.0
        } else {
            self.successful_requests as f64 / completed as f64
        }
    }
}

// ============================================================================
// Circuit Breaker Error
// ============================================================================

/// Errors raised by circuit breaker operations.
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, request rejected without execution.
    #[error("Circuit breaker is open - requests rejected")]
    CircuitOpen,

    /// Operation exceeded the configured timeout.
    #[error("Operation timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Operation executed and failed.
    #[error("Operation failed: {0}")]
    OperationFailed(E),

    /// Too many concurrent probes in half-open state.
    #[error("Too many concurrent requests in half-open state")]
    TooManyConcurrentRequests,

    /// Circuit breaker internal error.
    #[error("Circuit breaker internal error: {message}")]
    InternalError { message: String },
}

impl<E> CircuitBreakerError<E> {
    /// Whether the error reflects a dependency failure.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Self::OperationFailed(_) | Self::Timeout { .. } | Self::InternalError { .. }
        )
    }

    /// Whether the error came from circuit protection, not the operation.
    pub fn is_circuit_protection(&self) -> bool {
        matches!(self, Self::CircuitOpen | Self::TooManyConcurrentRequests)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
