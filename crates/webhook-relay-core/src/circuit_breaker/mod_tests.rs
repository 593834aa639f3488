use super::*;

// ============================================================================
// CircuitState Tests
// ============================================================================

#[test]
fn test_states_allowing_requests() {
    assert!(CircuitState::Closed.allows_requests());
    assert!(CircuitState::HalfOpen.allows_requests());
    assert!(CircuitState::Disabled.allows_requests());
    assert!(!CircuitState::Open.allows_requests());
    assert!(!CircuitState::ForcedOpen.allows_requests());
}

#[test]
fn test_failure_states() {
    assert!(CircuitState::Open.is_failure_state());
    assert!(CircuitState::HalfOpen.is_failure_state());
    assert!(CircuitState::ForcedOpen.is_failure_state());
    assert!(!CircuitState::Closed.is_failure_state());
    assert!(!CircuitState::Disabled.is_failure_state());
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_default_config() {
    let config = CircuitBreakerConfig::default();
    assert_eq!(config.sliding_window_size, 100);
    assert_eq!(config.minimum_calls, 10);
    assert_eq!(config.failure_rate_threshold, 0.5);
    assert_eq!(config.recovery_timeout, Duration::from_secs(30));
    assert_eq!(config.success_threshold, 3);
}

#[test]
fn test_named_config() {
    let config = CircuitBreakerConfig::named("bus-publish");
    assert_eq!(config.name, "bus-publish");
    assert_eq!(config.minimum_calls, 10);
}

// ============================================================================
// Error Classification Tests
// ============================================================================

#[test]
fn test_error_failure_classification() {
    let failed: CircuitBreakerError<String> =
        CircuitBreakerError::OperationFailed("boom".to_string());
    let timeout: CircuitBreakerError<String> = CircuitBreakerError::Timeout { timeout_ms: 100 };
    let open: CircuitBreakerError<String> = CircuitBreakerError::CircuitOpen;
    let busy: CircuitBreakerError<String> = CircuitBreakerError::TooManyConcurrentRequests;

    assert!(failed.counts_as_failure());
    assert!(timeout.counts_as_failure());
    assert!(!open.counts_as_failure());
    assert!(!busy.counts_as_failure());

    assert!(open.is_circuit_protection());
    assert!(busy.is_circuit_protection());
    assert!(!failed.is_circuit_protection());
}

// ============================================================================
// Metrics Tests
// ============================================================================

#[test]
fn test_success_rate_with_no_requests() {
    let metrics = CircuitMetrics {
        state: CircuitState::Closed,
        total_requests: 0,
        successful_requests: 0,
        failed_requests: 0,
        rejected_requests: 0,
        window_size: 0,
        failure_rate: 0.0,
        slow_call_rate: 0.0,
        last_state_change: Timestamp::now(),
        next_recovery_attempt: None,
    };
    assert_eq!(metrics.success_rate(), 1.0);
}

#[test]
fn test_success_rate_ignores_rejections() {
    let metrics = CircuitMetrics {
        state: CircuitState::Open,
        total_requests: 10,
        successful_requests: 3,
        failed_requests: 1,
        rejected_requests: 6,
        window_size: 4,
        failure_rate: 0.25,
        slow_call_rate: 0.0,
        last_state_change: Timestamp::now(),
        next_recovery_attempt: None,
    };
    assert_eq!(metrics.success_rate(), 0.75);
}
