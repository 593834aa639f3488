//! # Resilience Module
//!
//! Combines circuit breaking and retry policy into one publish path.
//! Breakers are kept per operation key so one failing downstream cannot
//! trip publishing for every provider; the retry policy absorbs the
//! transient failures that remain while a breaker is closed.

use crate::retry::{classify_bus_error, FailureKind, RetryPolicy};
use bus_runtime::{BusClient, BusError, Message, MessageId, TopicName};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use webhook_relay_core::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitMetrics, CircuitState,
    DefaultCircuitBreaker,
};

// ============================================================================
// Errors
// ============================================================================

/// Failure of a resilience-wrapped publish
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Circuit is open; the publish was not attempted
    #[error("Publish rejected: circuit breaker is open")]
    CircuitOpen,

    /// Failure class is not retried under the configured policy
    #[error("Publish rejected: {message}")]
    Rejected { message: String },

    /// Every allowed attempt failed
    #[error("Publish failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl PublishError {
    /// Whether the caller may reasonably try again later
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Combined resilience configuration for the publish path
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Retry policy applied when no per-key override matches
    pub retry: RetryPolicy,

    /// Retry policies for specific operation keys
    pub retry_overrides: HashMap<String, RetryPolicy>,

    /// Template for breakers; each key gets its own instance named after it
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            retry_overrides: HashMap::new(),
            circuit_breaker: CircuitBreakerConfig::named("bus-publish"),
        }
    }
}

// ============================================================================
// Resilience Policy
// ============================================================================

/// Retry-with-breaker wrapper around bus publishing
///
/// Operations are grouped by a caller-chosen key; the producer keys by
/// provider. Each key gets an independent breaker, created on first use
/// from the configured template, and optionally its own retry policy.
pub struct ResiliencePolicy {
    retry: RetryPolicy,
    retry_overrides: HashMap<String, RetryPolicy>,
    breaker_template: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<DefaultCircuitBreaker<MessageId, BusError>>>>,
}

impl ResiliencePolicy {
    /// Create policy from combined configuration
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            retry: config.retry,
            retry_overrides: config.retry_overrides,
            breaker_template: config.circuit_breaker,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Breaker for the key, created from the template on first use
    fn breaker(&self, key: &str) -> Arc<DefaultCircuitBreaker<MessageId, BusError>> {
        if let Ok(breakers) = self.breakers.read() {
            if let Some(breaker) = breakers.get(key) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = match self.breakers.write() {
            Ok(breakers) => breakers,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(breakers.entry(key.to_string()).or_insert_with(|| {
            let config = CircuitBreakerConfig {
                name: format!("{}:{}", self.breaker_template.name, key),
                ..self.breaker_template.clone()
            };
            Arc::new(DefaultCircuitBreaker::new(config))
        }))
    }

    /// Retry policy for the key, falling back to the global policy
    fn retry_for(&self, key: &str) -> &RetryPolicy {
        self.retry_overrides.get(key).unwrap_or(&self.retry)
    }

    /// Cheap admission check for the synchronous ingestion path
    ///
    /// Lets the producer reject new work before spawning a publish task
    /// that the breaker would refuse anyway.
    pub fn try_admit(&self, key: &str) -> bool {
        self.breaker(key).is_healthy()
    }

    /// Current breaker state for the key
    pub fn breaker_state(&self, key: &str) -> CircuitState {
        CircuitBreaker::<MessageId, BusError>::state(&*self.breaker(key))
    }

    /// Breaker metrics snapshot for the key
    pub fn breaker_metrics(&self, key: &str) -> CircuitMetrics {
        CircuitBreaker::<MessageId, BusError>::metrics(&*self.breaker(key))
    }

    /// Force the key's breaker closed, clearing its history
    pub fn reset_breaker(&self, key: &str) {
        CircuitBreaker::<MessageId, BusError>::reset(&*self.breaker(key))
    }

    /// Hold the key's breaker open until the next reset
    pub fn force_open_breaker(&self, key: &str) {
        CircuitBreaker::<MessageId, BusError>::force_open(&*self.breaker(key))
    }

    /// Publish through the key's breaker, retrying transient failures
    pub async fn publish(
        &self,
        client: &BusClient,
        key: &str,
        topic: &TopicName,
        message: &Message,
    ) -> Result<MessageId, PublishError> {
        let breaker = self.breaker(key);
        let retry = self.retry_for(key);
        let mut attempt: u32 = 0;

        loop {
            let result = breaker.call(|| client.publish(topic, message.clone())).await;

            let (kind, description) = match result {
                Ok(message_id) => return Ok(message_id),
                Err(CircuitBreakerError::CircuitOpen)
                | Err(CircuitBreakerError::TooManyConcurrentRequests) => {
                    // Fast-fail: retrying against an open circuit only
                    // delays the caller
                    return Err(PublishError::CircuitOpen);
                }
                Err(CircuitBreakerError::Timeout { timeout_ms }) => (
                    FailureKind::Timeout,
                    format!("operation timed out after {}ms", timeout_ms),
                ),
                Err(CircuitBreakerError::OperationFailed(e)) => {
                    (classify_bus_error(&e), e.to_string())
                }
                Err(CircuitBreakerError::InternalError { message }) => {
                    (FailureKind::Server, message)
                }
            };

            if !retry.retries_kind(kind) {
                return Err(PublishError::Rejected {
                    message: description,
                });
            }

            if !retry.should_retry(attempt) {
                warn!(
                    topic = %topic,
                    operation_key = key,
                    attempts = attempt + 1,
                    error = %description,
                    "Publish retries exhausted"
                );
                return Err(PublishError::Exhausted {
                    attempts: attempt + 1,
                    last_error: description,
                });
            }

            let delay = retry.calculate_delay(attempt);
            debug!(
                topic = %topic,
                operation_key = key,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %description,
                "Publish failed, backing off before retry"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
#[path = "resilience_tests.rs"]
mod tests;
