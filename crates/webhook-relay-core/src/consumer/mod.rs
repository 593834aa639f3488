//! # Consumer Pipeline
//!
//! Drives one delivered webhook event through deduplication, signature
//! verification, and processor dispatch, then reports how the bus message
//! should be settled.
//!
//! # Event Flow
//!
//! 1. Claim the dedup key; duplicates are acknowledged without reprocessing
//! 2. Verify the provider signature when a verifier is configured
//! 3. Dispatch to the registered processor under a deadline
//! 4. Map the outcome to an ack, redelivery, or dead-letter disposition
//!
//! Terminal outcomes are additionally cached under the event's dedup key,
//! so a duplicate delivery can report the original result.

use crate::idempotency::{ClaimOutcome, IdempotencyStore};
use crate::processor::{ProcessingContext, ProcessingResult, ProcessingStatus, ProcessorRegistry};
use crate::verifier::{VerificationPolicy, VerifierRegistry};
use crate::webhook::ReceivedWebhook;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prefix separating event claims from other keys in the shared store
const EVENT_KEY_PREFIX: &str = "event:";

/// Prefix for cached processing responses in the shared store
pub const RESPONSE_KEY_PREFIX: &str = "resp:";

// ============================================================================
// Disposition
// ============================================================================

/// How the bus message carrying an event should be settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge; the event is finished
    Ack,
    /// Return for redelivery, optionally after a delay
    Retry { delay: Option<Duration> },
    /// Route to the dead-letter queue with a reason
    DeadLetter { reason: String },
}

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the consumer pipeline
#[derive(Debug, Clone)]
pub struct ConsumerPipelineConfig {
    /// How long a processed event's dedup claim is remembered
    pub dedup_ttl: Duration,

    /// Upper bound on one processing attempt
    pub processing_deadline: Duration,

    /// Whether a deadline overrun is retried rather than dead-lettered
    pub retry_on_timeout: bool,
}

impl Default for ConsumerPipelineConfig {
    fn default() -> Self {
        Self {
            dedup_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            processing_deadline: Duration::from_secs(30),
            retry_on_timeout: true,
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Counters for pipeline outcomes
///
/// Plain atomics so the consumer loop can bump them without locking.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    received: AtomicU64,
    duplicates: AtomicU64,
    verification_failures: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

impl PipelineMetrics {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn verification_failures(&self) -> u64 {
        self.verification_failures.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Exactly-once consumer pipeline
pub struct ConsumerPipeline {
    idempotency: Arc<dyn IdempotencyStore>,
    verifiers: Arc<VerifierRegistry>,
    processors: Arc<ProcessorRegistry>,
    config: ConsumerPipelineConfig,
    metrics: Arc<PipelineMetrics>,
}

impl ConsumerPipeline {
    /// Create pipeline from its collaborators
    pub fn new(
        idempotency: Arc<dyn IdempotencyStore>,
        verifiers: Arc<VerifierRegistry>,
        processors: Arc<ProcessorRegistry>,
        config: ConsumerPipelineConfig,
    ) -> Self {
        Self {
            idempotency,
            verifiers,
            processors,
            config,
            metrics: Arc::new(PipelineMetrics::default()),
        }
    }

    /// Shared handle to the pipeline's counters
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run one delivered event through the pipeline
    pub async fn handle(&self, context: ProcessingContext) -> Disposition {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);

        let event_id = context.webhook.event_id;
        let provider = context.webhook.provider.clone();
        let dedup_key = context.webhook.dedup_key();
        let claim_key = format!("{}{}", EVENT_KEY_PREFIX, dedup_key);
        let response_key = format!("{}{}", RESPONSE_KEY_PREFIX, dedup_key);

        debug!(
            event_id = %event_id,
            provider = %provider,
            attempt = context.attempt_number,
            "Handling delivered event"
        );

        // Step 1: dedup claim
        match self
            .idempotency
            .claim(&claim_key, self.config.dedup_ttl)
            .await
        {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::AlreadyClaimed) => {
                self.metrics.duplicates.fetch_add(1, Ordering::Relaxed);
                info!(
                    event_id = %event_id,
                    provider = %provider,
                    "Duplicate event, acknowledging without reprocessing"
                );
                return Disposition::Ack;
            }
            Err(e) => {
                // Fail open: with the store unreachable we cannot tell a
                // duplicate from a first delivery, and reprocessing an event
                // is recoverable while dropping one is not.
                warn!(
                    event_id = %event_id,
                    provider = %provider,
                    error = %e,
                    "Idempotency store unavailable, processing without dedup guard"
                );
            }
        }

        // Step 2: signature verification
        match self.verify(&context) {
            VerifyOutcome::Passed => {}
            VerifyOutcome::Rejected(reason) => {
                self.metrics
                    .verification_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_id = %event_id,
                    provider = %provider,
                    reason = %reason,
                    "Signature verification rejected event"
                );
                return Disposition::DeadLetter { reason };
            }
            VerifyOutcome::Transient(reason) => {
                self.release_claim(&claim_key, &event_id.to_string()).await;
                self.metrics.retried.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_id = %event_id,
                    provider = %provider,
                    reason = %reason,
                    "Verifier internal error, returning event for redelivery"
                );
                return Disposition::Retry { delay: None };
            }
        }

        // Step 3: dispatch
        let processor = match self.processors.find(&context.webhook) {
            Some(processor) => processor,
            None => {
                // No processor claiming an event is routing, not failure
                self.metrics.skipped.fetch_add(1, Ordering::Relaxed);
                info!(
                    event_id = %event_id,
                    provider = %provider,
                    "No processor registered for provider, acknowledging unhandled event"
                );
                return Disposition::Ack;
            }
        };

        processor.before_process(&context).await;

        let attempt = tokio::time::timeout(
            self.config.processing_deadline,
            processor.process(&context),
        )
        .await;

        let disposition = match attempt {
            Ok(Ok(result)) => {
                processor.after_process(&context, &result).await;
                if result.is_terminal() {
                    self.cache_result(&response_key, &result).await;
                }
                match result.status {
                    ProcessingStatus::Success => {
                        self.metrics.processed.fetch_add(1, Ordering::Relaxed);
                        info!(event_id = %event_id, provider = %provider, "Event processed");
                        Disposition::Ack
                    }
                    ProcessingStatus::Skipped => {
                        self.metrics.skipped.fetch_add(1, Ordering::Relaxed);
                        debug!(event_id = %event_id, provider = %provider, "Event skipped");
                        Disposition::Ack
                    }
                    ProcessingStatus::Retry => {
                        self.release_claim(&claim_key, &event_id.to_string()).await;
                        self.metrics.retried.fetch_add(1, Ordering::Relaxed);
                        Disposition::Retry {
                            delay: result.retry_delay,
                        }
                    }
                    ProcessingStatus::Failed => {
                        self.metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
                        Disposition::DeadLetter {
                            reason: result
                                .message
                                .unwrap_or_else(|| "processing failed".to_string()),
                        }
                    }
                }
            }
            Ok(Err(error)) => {
                processor.on_error(&context, &error).await;
                if error.is_permanent() {
                    self.metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    Disposition::DeadLetter {
                        reason: error.to_string(),
                    }
                } else {
                    self.release_claim(&claim_key, &event_id.to_string()).await;
                    self.metrics.retried.fetch_add(1, Ordering::Relaxed);
                    Disposition::Retry { delay: None }
                }
            }
            Err(_) => {
                warn!(
                    event_id = %event_id,
                    provider = %provider,
                    deadline_ms = self.config.processing_deadline.as_millis() as u64,
                    "Processing deadline exceeded"
                );
                if self.config.retry_on_timeout {
                    self.release_claim(&claim_key, &event_id.to_string()).await;
                    self.metrics.retried.fetch_add(1, Ordering::Relaxed);
                    Disposition::Retry { delay: None }
                } else {
                    self.metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    Disposition::DeadLetter {
                        reason: "processing deadline exceeded".to_string(),
                    }
                }
            }
        };

        disposition
    }

    fn verify(&self, context: &ProcessingContext) -> VerifyOutcome {
        match self.verifiers.resolve(&context.webhook.provider) {
            VerificationPolicy::Skip => VerifyOutcome::Passed,
            VerificationPolicy::Missing => VerifyOutcome::Rejected(format!(
                "signature verification required but no verifier configured for provider '{}'",
                context.webhook.provider
            )),
            VerificationPolicy::Verify(verifier, secret) => {
                let payload = match context.webhook.payload_bytes() {
                    Ok(payload) => payload,
                    Err(e) => {
                        // Corrupt stored payload never improves on redelivery
                        return VerifyOutcome::Rejected(e.to_string());
                    }
                };
                match verifier.verify(&payload, &context.webhook.headers, secret) {
                    Ok(()) => VerifyOutcome::Passed,
                    Err(e) if e.is_rejection() => VerifyOutcome::Rejected(e.to_string()),
                    Err(e) => VerifyOutcome::Transient(e.to_string()),
                }
            }
        }
    }

    /// Previously recorded outcome for an event, when one is cached
    ///
    /// Lets callers answer a duplicate delivery with the original result
    /// rather than a bare acknowledgement.
    pub async fn cached_result(&self, webhook: &ReceivedWebhook) -> Option<ProcessingResult> {
        let key = format!("{}{}", RESPONSE_KEY_PREFIX, webhook.dedup_key());
        let cached = self.idempotency.get(&key).await.ok()??;
        serde_json::from_slice(&cached).ok()
    }

    /// Record a terminal result for the event's dedup window
    async fn cache_result(&self, response_key: &str, result: &ProcessingResult) {
        let encoded = match serde_json::to_vec(result) {
            Ok(encoded) => Bytes::from(encoded),
            Err(e) => {
                warn!(error = %e, "Failed to encode processing result for caching");
                return;
            }
        };
        if let Err(e) = self
            .idempotency
            .put(response_key, encoded, self.config.dedup_ttl)
            .await
        {
            // Duplicates fall back to a plain acknowledgement
            warn!(error = %e, "Failed to cache processing result");
        }
    }

    /// Drop a claim so a redelivery can reprocess the event
    async fn release_claim(&self, claim_key: &str, event_id: &str) {
        if let Err(e) = self.idempotency.release(claim_key).await {
            // Claim expires on its own TTL; the redelivery may be treated
            // as a duplicate until then.
            warn!(
                event_id = %event_id,
                error = %e,
                "Failed to release dedup claim before redelivery"
            );
        }
    }
}

enum VerifyOutcome {
    Passed,
    Rejected(String),
    Transient(String),
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
