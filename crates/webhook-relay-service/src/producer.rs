//! # Producer Module
//!
//! Ingestion-side pipeline: validates an inbound webhook, applies rate
//! limiting and breaker admission, then hands the event to a background
//! publish guarded by the resilience policy.
//!
//! Acceptance is decided synchronously; the publish itself is not awaited.
//! A webhook acknowledged as accepted can therefore still fail to reach the
//! bus if every retry is exhausted, which is logged loudly rather than
//! surfaced to the caller. Providers redeliver on their own schedule, and
//! holding their connection open for our internal retries helps nobody.

use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::resilience::ResiliencePolicy;
use bus_runtime::{BusClient, Message, PartitionKey, TopicName};
use bytes::Bytes;
use regex::Regex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use webhook_relay_core::webhook::{HttpMethod, ReceivedWebhook};
use webhook_relay_core::EventId;

/// Bus attribute carrying the provider name for consumers
pub const ATTR_PROVIDER: &str = "provider";
/// Bus attribute carrying the event ID for consumers
pub const ATTR_EVENT_ID: &str = "event_id";

// ============================================================================
// Configuration
// ============================================================================

/// Producer behavior configuration
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Topic events are published to
    pub topic: String,

    /// Largest accepted payload in bytes, measured uncompressed
    pub max_payload_size: usize,

    /// Whether payloads at or above the threshold are gzip-compressed
    pub compression_enabled: bool,

    /// Uncompressed size at which compression kicks in
    pub compression_threshold: usize,

    /// Optional TTL stamped onto published messages
    pub message_ttl: Option<Duration>,

    /// Request-shape checks applied before any other admission step
    pub security: SecurityConfig,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            topic: "webhooks".to_string(),
            max_payload_size: 1024 * 1024,
            compression_enabled: true,
            compression_threshold: 32 * 1024,
            message_ttl: None,
            security: SecurityConfig::default(),
        }
    }
}

/// Request-shape policy for inbound webhooks
///
/// Checks run before rate limiting so malformed traffic never consumes a
/// provider's token budget. The content type check only rejects an explicit
/// mismatch; webhooks submitted without a content type header pass.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// HTTP methods webhooks may arrive with
    pub allowed_methods: Vec<HttpMethod>,

    /// Accepted content types; empty means no restriction
    pub allowed_content_types: Vec<String>,

    /// Whether the payload size limit is enforced
    pub validate_payload_size: bool,

    /// Whether the provider name is checked against the pattern
    ///
    /// `ProviderName` enforces its structural rules at construction either
    /// way; this gates the operator-supplied pattern below.
    pub validate_provider_name: bool,

    /// Pattern provider names must match, beyond the structural rules
    pub provider_name_pattern: Option<Regex>,

    /// Whether submissions must come from an allowlisted source address
    pub enable_ip_allowlist: bool,

    /// Source addresses admitted per provider when the allowlist is enabled
    ///
    /// A provider without an entry admits no addresses.
    pub ip_allowlist: HashMap<String, Vec<IpAddr>>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_methods: vec![HttpMethod::Post, HttpMethod::Put],
            allowed_content_types: vec![
                "application/json".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ],
            validate_payload_size: true,
            validate_provider_name: true,
            provider_name_pattern: None,
            enable_ip_allowlist: false,
            ip_allowlist: HashMap::new(),
        }
    }
}

impl SecurityConfig {
    /// First policy violation for the webhook, if any
    fn violation(&self, webhook: &ReceivedWebhook) -> Option<String> {
        if !self.allowed_methods.contains(&webhook.http_method) {
            return Some(format!(
                "method {} is not accepted for webhooks",
                webhook.http_method
            ));
        }

        if self.validate_provider_name {
            if let Some(pattern) = &self.provider_name_pattern {
                if !pattern.is_match(webhook.provider.as_str()) {
                    return Some(format!(
                        "provider name '{}' does not match the accepted pattern",
                        webhook.provider
                    ));
                }
            }
        }

        if !self.allowed_content_types.is_empty() {
            if let Some(content_type) = webhook.header("content-type") {
                // Ignore parameters such as charset when matching
                let media_type = content_type
                    .split(';')
                    .next()
                    .unwrap_or(content_type)
                    .trim();
                if !self
                    .allowed_content_types
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(media_type))
                {
                    return Some(format!("content type '{}' is not accepted", media_type));
                }
            }
        }

        if self.enable_ip_allowlist {
            let allowed = self.ip_allowlist.get(webhook.provider.as_str());
            match webhook.source_ip {
                Some(ip) if allowed.is_some_and(|list| list.contains(&ip)) => {}
                Some(ip) => {
                    return Some(format!(
                        "source address {} is not allowlisted for provider '{}'",
                        ip, webhook.provider
                    ))
                }
                None => return Some("source address unknown, allowlist enforced".to_string()),
            }
        }

        None
    }
}

// ============================================================================
// Submission Ack
// ============================================================================

/// How a submission was disposed of at the ingestion boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionDisposition {
    /// Validated and queued for publishing
    Accepted,
    /// Rejected outright; resubmitting the same request will not help
    Rejected,
    /// Throttled; resubmitting after the indicated delay may succeed
    RateLimited,
}

/// Synchronous answer to one webhook submission
#[derive(Debug, Clone)]
pub struct SubmissionAck {
    pub disposition: SubmissionDisposition,
    /// Event ID assigned to accepted submissions
    pub event_id: Option<EventId>,
    /// Human-readable reason for non-accepted dispositions
    pub message: Option<String>,
    /// Suggested wait before resubmitting, for rate-limited submissions
    pub retry_after: Option<Duration>,
}

impl SubmissionAck {
    fn accepted(event_id: EventId) -> Self {
        Self {
            disposition: SubmissionDisposition::Accepted,
            event_id: Some(event_id),
            message: None,
            retry_after: None,
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            disposition: SubmissionDisposition::Rejected,
            event_id: None,
            message: Some(message.into()),
            retry_after: None,
        }
    }

    fn rate_limited(retry_after: Duration) -> Self {
        Self {
            disposition: SubmissionDisposition::RateLimited,
            event_id: None,
            message: Some("rate limit exceeded".to_string()),
            retry_after: Some(retry_after),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.disposition == SubmissionDisposition::Accepted
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Counters for ingestion outcomes
#[derive(Debug, Default)]
pub struct ProducerMetrics {
    accepted: AtomicU64,
    rejected: AtomicU64,
    rate_limited: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
}

impl ProducerMetrics {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Producer
// ============================================================================

/// Validating, rate-limited front end to the bus
pub struct WebhookProducer {
    client: BusClient,
    topic: TopicName,
    config: ProducerConfig,
    rate_limiter: Arc<RateLimiter>,
    resilience: Arc<ResiliencePolicy>,
    metrics: Arc<ProducerMetrics>,
}

impl WebhookProducer {
    /// Create producer over the given bus client
    pub fn new(
        client: BusClient,
        config: ProducerConfig,
        rate_limiter: Arc<RateLimiter>,
        resilience: Arc<ResiliencePolicy>,
    ) -> Result<Self, bus_runtime::ValidationError> {
        let topic = TopicName::new(config.topic.clone())?;
        Ok(Self {
            client,
            topic,
            config,
            rate_limiter,
            resilience,
            metrics: Arc::new(ProducerMetrics::default()),
        })
    }

    /// Shared handle to the producer's counters
    pub fn metrics(&self) -> Arc<ProducerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Validate and enqueue one inbound webhook
    ///
    /// Returns as soon as the submission is accepted or refused; the actual
    /// publish runs on a spawned task under the resilience policy.
    pub async fn submit(&self, mut webhook: ReceivedWebhook) -> SubmissionAck {
        let event_id = webhook.event_id;
        let provider = webhook.provider.clone();

        // Step 1: request-shape policy ahead of everything else
        if let Some(violation) = self.config.security.violation(&webhook) {
            self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                event_id = %event_id,
                provider = %provider,
                reason = %violation,
                "Rejecting submission on security policy"
            );
            return SubmissionAck::rejected(violation);
        }

        // Step 2: size validation against the uncompressed payload
        let payload_size = webhook.payload.original_size();
        if self.config.security.validate_payload_size && payload_size > self.config.max_payload_size
        {
            self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                event_id = %event_id,
                provider = %provider,
                size = payload_size,
                max = self.config.max_payload_size,
                "Rejecting oversized payload"
            );
            return SubmissionAck::rejected(format!(
                "payload of {} bytes exceeds limit of {} bytes",
                payload_size, self.config.max_payload_size
            ));
        }

        // Step 3: per-provider rate limiting
        if let RateLimitDecision::Limited { retry_after } =
            self.rate_limiter.check(provider.as_str())
        {
            self.metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
            debug!(
                event_id = %event_id,
                provider = %provider,
                retry_after_ms = retry_after.as_millis() as u64,
                "Submission rate limited"
            );
            return SubmissionAck::rate_limited(retry_after);
        }

        // Step 4: breaker admission before taking on the work
        if !self.resilience.try_admit(provider.as_str()) {
            self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                event_id = %event_id,
                provider = %provider,
                "Rejecting submission while publish circuit is open"
            );
            return SubmissionAck::rejected("event bus is unavailable, retry later");
        }

        // Step 5: optional payload compression
        if self.config.compression_enabled {
            webhook.payload = match webhook
                .payload
                .clone()
                .compress_if_larger(self.config.compression_threshold)
            {
                Ok(payload) => payload,
                Err(e) => {
                    // Compression is an optimization; ship the raw payload
                    warn!(event_id = %event_id, error = %e, "Compression failed, publishing raw");
                    webhook.payload
                }
            };
        }

        // Step 6: envelope encoding
        let body = match serde_json::to_vec(&webhook) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                error!(event_id = %event_id, error = %e, "Failed to encode event envelope");
                return SubmissionAck::rejected("failed to encode event");
            }
        };

        // Provider as partition key keeps each provider's events ordered
        let partition_key = match PartitionKey::new(provider.as_str()) {
            Ok(key) => key,
            Err(e) => {
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                return SubmissionAck::rejected(format!("invalid partition key: {}", e));
            }
        };

        let mut message = Message::new(body)
            .with_partition_key(partition_key)
            .with_attribute(ATTR_PROVIDER.to_string(), provider.as_str().to_string())
            .with_attribute(ATTR_EVENT_ID.to_string(), event_id.as_str());
        if let Some(ttl) = self.config.message_ttl {
            message = message.with_ttl(chrono::Duration::from_std(ttl).unwrap_or_default());
        }

        // Step 7: hand off to the background publish
        let client = self.client.clone();
        let topic = self.topic.clone();
        let resilience = Arc::clone(&self.resilience);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match resilience
                .publish(&client, provider.as_str(), &topic, &message)
                .await
            {
                Ok(message_id) => {
                    metrics.published.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        event_id = %event_id,
                        message_id = %message_id.as_str(),
                        "Event published"
                    );
                }
                Err(e) => {
                    metrics.publish_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        event_id = %event_id,
                        provider = %provider,
                        error = %e,
                        "Accepted event was lost: publish failed after all retries"
                    );
                }
            }
        });

        self.metrics.accepted.fetch_add(1, Ordering::Relaxed);
        info!(event_id = %event_id, "Webhook accepted");
        SubmissionAck::accepted(event_id)
    }
}

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;
