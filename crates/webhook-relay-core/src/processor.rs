//! # Webhook Processor Contract
//!
//! Trait and registry for provider-specific business logic. Processors are
//! registered per provider and invoked by the consumer pipeline once an
//! event has passed deduplication and signature verification.

use crate::webhook::ReceivedWebhook;
use crate::{CorrelationId, ProviderName, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Processing Context
// ============================================================================

/// Delivery context handed to a processor alongside the webhook
///
/// Carries bus position and delivery history so processors can make
/// retry-aware decisions without touching the bus directly.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub webhook: ReceivedWebhook,
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    /// Delivery attempt, starting at 1 for the first delivery
    pub attempt_number: u32,
    pub correlation_id: CorrelationId,
    pub metadata: HashMap<String, String>,
}

impl ProcessingContext {
    /// Create context for a first delivery
    pub fn new(webhook: ReceivedWebhook, topic: impl Into<String>) -> Self {
        Self {
            webhook,
            topic: topic.into(),
            partition: 0,
            offset: 0,
            attempt_number: 1,
            correlation_id: CorrelationId::new(),
            metadata: HashMap::new(),
        }
    }

    /// Set bus position
    pub fn with_position(mut self, partition: u32, offset: u64) -> Self {
        self.partition = partition;
        self.offset = offset;
        self
    }

    /// Set delivery attempt number
    pub fn with_attempt_number(mut self, attempt: u32) -> Self {
        self.attempt_number = attempt;
        self
    }

    /// Set correlation ID propagated from the producer
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Attach metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check whether this delivery is a redelivery
    pub fn is_retry(&self) -> bool {
        self.attempt_number > 1
    }
}

// ============================================================================
// Processing Result
// ============================================================================

/// Terminal status of one processing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingStatus {
    /// Event handled, acknowledge and record completion
    Success,
    /// Transient failure, redeliver later
    Retry,
    /// Permanent failure, dead-letter
    Failed,
    /// Event intentionally ignored, acknowledge without side effects
    Skipped,
}

/// Outcome of a processing attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub status: ProcessingStatus,
    pub message: Option<String>,
    /// Diagnostic detail for failed or retried attempts
    pub error_details: Option<String>,
    pub completed_at: Timestamp,
    /// Wall time the attempt took, when the processor measured it
    pub processing_duration: Option<Duration>,
    /// Explicit redelivery delay overriding the bus default
    pub retry_delay: Option<Duration>,
    /// Opaque result values for downstream consumers
    pub data: HashMap<String, serde_json::Value>,
}

impl ProcessingResult {
    fn with_status(status: ProcessingStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            error_details: None,
            completed_at: Timestamp::now(),
            processing_duration: None,
            retry_delay: None,
            data: HashMap::new(),
        }
    }

    /// Create successful result
    pub fn success() -> Self {
        Self::with_status(ProcessingStatus::Success, None)
    }

    /// Create result requesting redelivery
    pub fn retry(message: impl Into<String>) -> Self {
        Self::with_status(ProcessingStatus::Retry, Some(message.into()))
    }

    /// Create permanently failed result
    pub fn failed(message: impl Into<String>) -> Self {
        Self::with_status(ProcessingStatus::Failed, Some(message.into()))
    }

    /// Create skipped result
    pub fn skipped(message: impl Into<String>) -> Self {
        Self::with_status(ProcessingStatus::Skipped, Some(message.into()))
    }

    /// Attach a human-readable message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach diagnostic detail
    pub fn with_error_details(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }

    /// Record how long the attempt took
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.processing_duration = Some(duration);
        self
    }

    /// Request a specific redelivery delay instead of the bus default
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Attach an opaque result value
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Whether the event should be redelivered
    ///
    /// Derived from status rather than stored so the two can never disagree.
    pub fn should_retry(&self) -> bool {
        self.status == ProcessingStatus::Retry
    }

    /// Whether the event is finished (no redelivery, successful or not)
    pub fn is_terminal(&self) -> bool {
        !self.should_retry()
    }
}

// ============================================================================
// Processor Error
// ============================================================================

/// Error raised by a processor during an attempt
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessorError {
    #[error("Transient processing failure: {message}")]
    Transient { message: String },

    #[error("Permanent processing failure: {message}")]
    Permanent { message: String },
}

impl ProcessorError {
    /// Create transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create permanent error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Check whether a retry can ever succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }
}

// ============================================================================
// Processor Trait
// ============================================================================

/// Business logic for one provider's webhooks
///
/// Implementations must be idempotent at the business level in addition to
/// the pipeline's dedup guard, since redeliveries after partial failures
/// are possible.
#[async_trait]
pub trait WebhookProcessor: Send + Sync {
    /// Provider whose events this processor handles
    fn provider_name(&self) -> ProviderName;

    /// Finer-grained claim check within a provider
    ///
    /// Defaults to accepting every event for the provider. Override to
    /// route event subtypes to dedicated processors.
    fn can_process(&self, _webhook: &ReceivedWebhook) -> bool {
        true
    }

    /// Hook invoked before each attempt
    async fn before_process(&self, _context: &ProcessingContext) {}

    /// Hook invoked after a completed attempt
    async fn after_process(&self, _context: &ProcessingContext, _result: &ProcessingResult) {}

    /// Hook invoked when an attempt raised an error
    async fn on_error(&self, _context: &ProcessingContext, _error: &ProcessorError) {}

    /// Process one webhook event
    async fn process(&self, context: &ProcessingContext)
        -> Result<ProcessingResult, ProcessorError>;
}

// ============================================================================
// Processor Registry
// ============================================================================

/// Registry mapping providers to their processors
///
/// Lookup is by normalized provider name, then the first processor whose
/// `can_process` claims the event wins.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Vec<Arc<dyn WebhookProcessor>>>,
}

impl ProcessorRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under its provider name
    pub fn register(&mut self, processor: Arc<dyn WebhookProcessor>) {
        let provider = processor.provider_name().as_str().to_string();
        self.processors.entry(provider).or_default().push(processor);
    }

    /// Find the processor claiming a webhook, if any
    pub fn find(&self, webhook: &ReceivedWebhook) -> Option<Arc<dyn WebhookProcessor>> {
        self.processors
            .get(webhook.provider.as_str())?
            .iter()
            .find(|p| p.can_process(webhook))
            .cloned()
    }

    /// Providers with at least one registered processor
    pub fn providers(&self) -> Vec<&str> {
        self.processors.keys().map(String::as_str).collect()
    }

    /// Total number of registered processors
    pub fn len(&self) -> usize {
        self.processors.values().map(Vec::len).sum()
    }

    /// Check whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("providers", &self.providers())
            .field("processor_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
