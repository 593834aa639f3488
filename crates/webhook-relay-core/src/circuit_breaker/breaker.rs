//! Default circuit breaker implementation.
//!
//! Thread-safe implementation using Arc<RwLock<>> around a count-based
//! sliding window of call outcomes.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::timeout;

use super::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitMetrics, CircuitState,
};
use crate::Timestamp;

// ============================================================================
// Internal State
// ============================================================================

/// Outcome of one completed call in the sliding window.
#[derive(Debug, Clone, Copy)]
struct CallOutcome {
    failed: bool,
    slow: bool,
}

/// Internal state protected by RwLock.
#[derive(Debug)]
struct InternalState {
    current_state: CircuitState,

    /// Most recent call outcomes, bounded by the configured window size.
    window: VecDeque<CallOutcome>,

    /// Consecutive probe successes in half-open state.
    consecutive_successes: u32,

    /// Current concurrent probes in half-open state.
    half_open_concurrent: u32,

    last_state_change: Timestamp,

    /// When the circuit may transition from open to half-open.
    next_recovery_attempt: Option<Timestamp>,

    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    rejected_requests: u64,
}

impl InternalState {
    fn new() -> Self {
        Self {
            current_state: CircuitState::Closed,
            window: VecDeque::new(),
            consecutive_successes: 0,
            half_open_concurrent: 0,
            last_state_change: Timestamp::now(),
            next_recovery_attempt: None,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            rejected_requests: 0,
        }
    }

    fn push_outcome(&mut self, outcome: CallOutcome, window_size: usize) {
        if self.window.len() >= window_size {
            self.window.pop_front();
        }
        self.window.push_back(outcome);
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            let failed = self.window.iter().filter(|o| o.failed).count();
            failed as f64 / self.window.len() as f64
        }
    }

    fn slow_call_rate(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            let slow = self.window.iter().filter(|o| o.slow).count();
            slow as f64 / self.window.len() as f64
        }
    }
}

// ============================================================================
// Default Circuit Breaker
// ============================================================================

/// Default circuit breaker implementation.
///
/// Trips on failure or slow-call rates over a count-based sliding window
/// once the minimum call count is reached.
pub struct DefaultCircuitBreaker<T, E> {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<InternalState>>,
    _phantom: std::marker::PhantomData<fn() -> (T, E)>,
}

impl<T, E> DefaultCircuitBreaker<T, E> {
    /// Create new circuit breaker with configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(InternalState::new())),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Check if the circuit should transition from open to half-open.
    fn should_attempt_recovery(&self, state: &InternalState) -> bool {
        match state.current_state {
            CircuitState::Open => state
                .next_recovery_attempt
                .map(|at| Timestamp::now() >= at)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Whether the window currently justifies tripping the circuit.
    fn should_trip(&self, state: &InternalState) -> bool {
        if (state.window.len() as u32) < self.config.minimum_calls {
            return false;
        }
        state.failure_rate() >= self.config.failure_rate_threshold
            || state.slow_call_rate() >= self.config.slow_call_rate_threshold
    }

    fn trip_circuit(&self, state: &mut InternalState) {
        state.current_state = CircuitState::Open;
        state.last_state_change = Timestamp::now();
        state.next_recovery_attempt =
            Some(Timestamp::now().add_duration(self.config.recovery_timeout));
        state.consecutive_successes = 0;
    }

    fn transition_to_half_open(&self, state: &mut InternalState) {
        state.current_state = CircuitState::HalfOpen;
        state.last_state_change = Timestamp::now();
        state.next_recovery_attempt = None;
        state.consecutive_successes = 0;
        state.half_open_concurrent = 0;
        state.window.clear();
    }

    fn close_circuit(&self, state: &mut InternalState) {
        state.current_state = CircuitState::Closed;
        state.last_state_change = Timestamp::now();
        state.next_recovery_attempt = None;
        state.consecutive_successes = 0;
        state.half_open_concurrent = 0;
        state.window.clear();
    }

    fn record_success(&self, state: &mut InternalState, elapsed: Duration) {
        state.successful_requests += 1;
        state.total_requests += 1;
        state.push_outcome(
            CallOutcome {
                failed: false,
                slow: elapsed >= self.config.slow_call_duration,
            },
            self.config.sliding_window_size,
        );

        match state.current_state {
            CircuitState::Closed => {
                // Successes can still trip the circuit through the slow-call rate.
                if self.should_trip(state) {
                    self.trip_circuit(state);
                }
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                state.half_open_concurrent = state.half_open_concurrent.saturating_sub(1);
                if state.consecutive_successes >= self.config.success_threshold {
                    self.close_circuit(state);
                }
            }
            CircuitState::Disabled => {}
            CircuitState::Open | CircuitState::ForcedOpen => {
                state.half_open_concurrent = state.half_open_concurrent.saturating_sub(1);
            }
        }
    }

    fn record_failure(&self, state: &mut InternalState) {
        state.failed_requests += 1;
        state.total_requests += 1;
        state.push_outcome(
            CallOutcome {
                failed: true,
                slow: false,
            },
            self.config.sliding_window_size,
        );
        state.consecutive_successes = 0;

        match state.current_state {
            CircuitState::Closed => {
                if self.should_trip(state) {
                    self.trip_circuit(state);
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure reopens the circuit.
                state.half_open_concurrent = state.half_open_concurrent.saturating_sub(1);
                self.trip_circuit(state);
            }
            CircuitState::Disabled => {}
            CircuitState::Open | CircuitState::ForcedOpen => {
                state.half_open_concurrent = state.half_open_concurrent.saturating_sub(1);
            }
        }
    }

    fn record_rejection(&self, state: &mut InternalState) {
        state.rejected_requests += 1;
        state.total_requests += 1;
    }
}

#[async_trait]
impl<T, E> CircuitBreaker<T, E> for DefaultCircuitBreaker<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    async fn call<F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, E>> + Send,
    {
        let start_time = std::time::Instant::now();

        // Check circuit state and handle transitions.
        {
            let mut state = self
                .state
                .write()
                .map_err(|e| CircuitBreakerError::InternalError {
                    message: format!("Failed to acquire write lock: {}", e),
                })?;

            match state.current_state {
                CircuitState::Closed | CircuitState::Disabled => {}
                CircuitState::Open => {
                    if self.should_attempt_recovery(&state) {
                        self.transition_to_half_open(&mut state);
                        state.half_open_concurrent += 1;
                    } else {
                        self.record_rejection(&mut state);
                        return Err(CircuitBreakerError::CircuitOpen);
                    }
                }
                CircuitState::ForcedOpen => {
                    self.record_rejection(&mut state);
                    return Err(CircuitBreakerError::CircuitOpen);
                }
                CircuitState::HalfOpen => {
                    if state.half_open_concurrent >= self.config.half_open_max_requests {
                        self.record_rejection(&mut state);
                        return Err(CircuitBreakerError::TooManyConcurrentRequests);
                    }
                    state.half_open_concurrent += 1;
                }
            }
        }

        // Execute operation with timeout, outside the lock.
        let result = timeout(self.config.operation_timeout, operation()).await;
        let elapsed = start_time.elapsed();

        let mut state = self
            .state
            .write()
            .map_err(|e| CircuitBreakerError::InternalError {
                message: format!("Failed to acquire write lock: {}", e),
            })?;

        match result {
            Ok(Ok(value)) => {
                self.record_success(&mut state, elapsed);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(&mut state);
                Err(CircuitBreakerError::OperationFailed(e))
            }
            Err(_) => {
                self.record_failure(&mut state);
                Err(CircuitBreakerError::Timeout {
                    timeout_ms: self.config.operation_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn state(&self) -> CircuitState {
        self.state
            .read()
            .map(|state| state.current_state)
            .unwrap_or(CircuitState::Open) // Lock poisoning is treated as open
    }

    fn metrics(&self) -> CircuitMetrics {
        match self.state.read() {
            Ok(state) => CircuitMetrics {
                state: state.current_state,
                total_requests: state.total_requests,
                successful_requests: state.successful_requests,
                failed_requests: state.failed_requests,
                rejected_requests: state.rejected_requests,
                window_size: state.window.len(),
                failure_rate: state.failure_rate(),
                slow_call_rate: state.slow_call_rate(),
                last_state_change: state.last_state_change,
                next_recovery_attempt: state.next_recovery_attempt,
            },
            Err(_) => CircuitMetrics {
                state: CircuitState::Open,
                total_requests: 0,
                successful_requests: 0,
                failed_requests: 0,
                rejected_requests: 0,
                window_size: 0,
                failure_rate: 0.0,
                slow_call_rate: 0.0,
                last_state_change: Timestamp::now(),
                next_recovery_attempt: None,
            },
        }
    }

    fn reset(&self) {
        if let Ok(mut state) = self.state.write() {
            self.close_circuit(&mut state);
            state.total_requests = 0;
            state.successful_requests = 0;
            state.failed_requests = 0;
            state.rejected_requests = 0;
        }
    }

    fn force_open(&self) {
        if let Ok(mut state) = self.state.write() {
            state.current_state = CircuitState::ForcedOpen;
            state.last_state_change = Timestamp::now();
            state.next_recovery_attempt = None;
        }
    }

    fn disable(&self) {
        if let Ok(mut state) = self.state.write() {
            state.current_state = CircuitState::Disabled;
            state.last_state_change = Timestamp::now();
            state.next_recovery_attempt = None;
        }
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
