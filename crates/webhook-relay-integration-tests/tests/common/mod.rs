//! Common test utilities for webhook relay integration tests
//!
//! This module provides:
//! - A full in-memory relay harness (bus, producer, consumer pipeline)
//! - A counting processor double
//! - A bus provider double whose publishes always fail
//! - Signature construction helpers for both supported schemes

use async_trait::async_trait;
use bus_runtime::{
    BusClient, BusError, BusProvider, InMemoryConfig, InMemoryProvider, Message, MessageId,
    ProviderType, ReceiptHandle, ReceivedMessage, TopicName,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use webhook_relay_core::consumer::{ConsumerPipeline, ConsumerPipelineConfig};
use webhook_relay_core::idempotency::InMemoryIdempotencyStore;
use webhook_relay_core::processor::{
    ProcessingContext, ProcessingResult, ProcessorError, ProcessorRegistry, WebhookProcessor,
};
use webhook_relay_core::verifier::{SecretValue, SignatureVerifier, VerifierRegistry};
use webhook_relay_core::webhook::{HttpMethod, Payload, ReceivedWebhook, WebhookHeaders};
use webhook_relay_core::{EventId, ProviderName};
use webhook_relay_service::{
    ConsumerLoop, ConsumerLoopConfig, HmacSha256Verifier, ProducerConfig, RateLimitConfig,
    RateLimiter, ResilienceConfig, ResiliencePolicy, RetryPolicy, TimestampedHmacVerifier,
    WebhookProducer,
};

// ============================================================================
// Counting Processor
// ============================================================================

/// Processor that counts deliveries and always succeeds
pub struct CountingProcessor {
    provider: ProviderName,
    calls: AtomicU32,
}

impl CountingProcessor {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: ProviderName::new(provider).unwrap(),
            calls: AtomicU32::new(0),
        }
    }

    #[allow(dead_code)]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookProcessor for CountingProcessor {
    fn provider_name(&self) -> ProviderName {
        self.provider.clone()
    }

    async fn process(
        &self,
        _context: &ProcessingContext,
    ) -> Result<ProcessingResult, ProcessorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessingResult::success())
    }
}

// ============================================================================
// Failing Bus Provider
// ============================================================================

/// Bus provider whose publishes always fail with a connection error
#[allow(dead_code)]
pub struct UnreachableBusProvider {
    publish_attempts: AtomicU32,
}

impl UnreachableBusProvider {
    pub fn new() -> Self {
        Self {
            publish_attempts: AtomicU32::new(0),
        }
    }

    #[allow(dead_code)]
    pub fn publish_attempts(&self) -> u32 {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    fn refused(&self) -> BusError {
        BusError::ConnectionFailed {
            message: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl BusProvider for UnreachableBusProvider {
    async fn publish(&self, _topic: &TopicName, _message: &Message) -> Result<MessageId, BusError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.refused())
    }

    async fn receive(
        &self,
        _topic: &TopicName,
        _timeout: chrono::Duration,
    ) -> Result<Option<ReceivedMessage>, BusError> {
        Err(self.refused())
    }

    async fn receive_batch(
        &self,
        _topic: &TopicName,
        _max_messages: u32,
        _timeout: chrono::Duration,
    ) -> Result<Vec<ReceivedMessage>, BusError> {
        Err(self.refused())
    }

    async fn ack(&self, _receipt: &ReceiptHandle) -> Result<(), BusError> {
        Err(self.refused())
    }

    async fn nack(&self, _receipt: &ReceiptHandle) -> Result<(), BusError> {
        Err(self.refused())
    }

    async fn dead_letter(&self, _receipt: &ReceiptHandle, _reason: &str) -> Result<(), BusError> {
        Err(self.refused())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

// ============================================================================
// Relay Harness
// ============================================================================

/// Scheme wired for the harness provider
pub enum Verification {
    /// No verifier registered, registry does not require one
    Open,
    /// HMAC-SHA256 over the raw payload
    Hmac { secret: &'static str },
    /// Timestamped HMAC with a replay tolerance
    TimestampedHmac {
        secret: &'static str,
        tolerance: Duration,
    },
}

/// Full relay wired over the in-memory bus
#[allow(dead_code)]
pub struct RelayHarness {
    pub bus: Arc<InMemoryProvider>,
    pub client: BusClient,
    pub producer: WebhookProducer,
    pub resilience: Arc<ResiliencePolicy>,
    pub consumer: ConsumerLoop,
    pub processor: Arc<CountingProcessor>,
    pub topic: TopicName,
}

pub const PROVIDER: &str = "acme";

impl RelayHarness {
    pub fn new(verification: Verification) -> Self {
        let bus = Arc::new(InMemoryProvider::new(InMemoryConfig::default()));
        let client = BusClient::new(bus.clone());
        let topic = TopicName::new("webhooks").unwrap();

        let provider_name = ProviderName::new(PROVIDER).unwrap();
        let mut verifiers = VerifierRegistry::new();
        match verification {
            Verification::Open => {}
            Verification::Hmac { secret } => {
                verifiers = verifiers.require_by_default();
                verifiers.register(
                    provider_name.clone(),
                    Arc::new(HmacSha256Verifier::new()) as Arc<dyn SignatureVerifier>,
                    SecretValue::new(secret),
                );
            }
            Verification::TimestampedHmac { secret, tolerance } => {
                verifiers = verifiers.require_by_default();
                verifiers.register(
                    provider_name.clone(),
                    Arc::new(TimestampedHmacVerifier::with_header_and_tolerance(
                        TimestampedHmacVerifier::DEFAULT_HEADER,
                        tolerance,
                    )) as Arc<dyn SignatureVerifier>,
                    SecretValue::new(secret),
                );
            }
        }

        let processor = Arc::new(CountingProcessor::new(PROVIDER));
        let mut processors = ProcessorRegistry::new();
        processors.register(processor.clone());

        let resilience = Arc::new(ResiliencePolicy::new(ResilienceConfig::default()));
        let producer = WebhookProducer::new(
            client.clone(),
            ProducerConfig::default(),
            Arc::new(RateLimiter::new(RateLimitConfig {
                enabled: false,
                ..RateLimitConfig::default()
            })),
            resilience.clone(),
        )
        .unwrap();

        let pipeline = Arc::new(ConsumerPipeline::new(
            Arc::new(InMemoryIdempotencyStore::new()),
            Arc::new(verifiers),
            Arc::new(processors),
            ConsumerPipelineConfig::default(),
        ));
        let consumer = ConsumerLoop::new(
            client.clone(),
            pipeline,
            ConsumerLoopConfig {
                topic: "webhooks".to_string(),
                poll_timeout: Duration::from_millis(20),
                error_backoff: Duration::from_millis(20),
            },
        )
        .unwrap();

        Self {
            bus,
            client,
            producer,
            resilience,
            consumer,
            processor,
            topic,
        }
    }

    /// Wait until the topic holds at least `depth` messages
    #[allow(dead_code)]
    pub async fn wait_for_depth(&self, depth: usize) {
        for _ in 0..200 {
            if self.bus.topic_depth(&self.topic) >= depth {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "topic never reached depth {} (currently {})",
            depth,
            self.bus.topic_depth(&self.topic)
        );
    }

    /// Drain the topic through the consumer until it is empty
    #[allow(dead_code)]
    pub async fn drain(&self) {
        while self.consumer.poll_once().await.unwrap() {}
    }

    #[allow(dead_code)]
    pub fn dead_letters(&self) -> Vec<bus_runtime::DeadLetteredMessage> {
        self.bus.dead_letter_messages(&self.topic)
    }
}

// ============================================================================
// Webhook Builders
// ============================================================================

/// Webhook with no signature headers
#[allow(dead_code)]
pub fn unsigned_webhook(event_id: EventId, body: &str) -> ReceivedWebhook {
    webhook_with_headers(event_id, body, WebhookHeaders::new())
}

/// Webhook carrying an HMAC-SHA256 signature over the body
#[allow(dead_code)]
pub fn hmac_signed_webhook(event_id: EventId, body: &str, secret: &str) -> ReceivedWebhook {
    let mut headers = WebhookHeaders::new();
    headers.insert(
        "x-hub-signature-256",
        format!("sha256={}", hmac_sha256_hex(secret, body.as_bytes())),
    );
    webhook_with_headers(event_id, body, headers)
}

/// Webhook carrying a timestamped HMAC signature dated `timestamp`
#[allow(dead_code)]
pub fn timestamped_webhook(
    event_id: EventId,
    body: &str,
    secret: &str,
    timestamp: i64,
) -> ReceivedWebhook {
    let digest = TimestampedHmacVerifier::sign(&SecretValue::new(secret), timestamp, body.as_bytes())
        .expect("signing with a literal secret cannot fail");
    let mut headers = WebhookHeaders::new();
    headers.insert(
        "stripe-signature",
        format!("t={},v1={}", timestamp, digest),
    );
    webhook_with_headers(event_id, body, headers)
}

#[allow(dead_code)]
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn webhook_with_headers(event_id: EventId, body: &str, headers: WebhookHeaders) -> ReceivedWebhook {
    ReceivedWebhook::new(
        Some(event_id),
        ProviderName::new(PROVIDER).unwrap(),
        Payload::raw(Bytes::from(body.to_string())),
        headers,
        HttpMethod::Post,
    )
}
