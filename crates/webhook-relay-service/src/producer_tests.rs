use super::*;
use crate::rate_limit::RateLimitConfig;
use crate::resilience::ResilienceConfig;
use bus_runtime::{InMemoryConfig, InMemoryProvider};
use webhook_relay_core::webhook::{HttpMethod, Payload, WebhookHeaders};
use webhook_relay_core::ProviderName;

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    producer: WebhookProducer,
    provider: Arc<InMemoryProvider>,
    client: BusClient,
}

fn harness_with(config: ProducerConfig, rate_limit: RateLimitConfig) -> Harness {
    let provider = Arc::new(InMemoryProvider::new(InMemoryConfig::default()));
    let client = BusClient::new(provider.clone());
    let producer = WebhookProducer::new(
        client.clone(),
        config,
        Arc::new(RateLimiter::new(rate_limit)),
        Arc::new(ResiliencePolicy::new(ResilienceConfig::default())),
    )
    .unwrap();
    Harness {
        producer,
        provider,
        client,
    }
}

fn harness() -> Harness {
    harness_with(
        ProducerConfig::default(),
        RateLimitConfig {
            enabled: false,
            ..Default::default()
        },
    )
}

fn webhook_with_payload(payload: Payload) -> ReceivedWebhook {
    ReceivedWebhook::new(
        None,
        ProviderName::new("stripe").unwrap(),
        payload,
        WebhookHeaders::new(),
        HttpMethod::Post,
    )
}

fn webhook() -> ReceivedWebhook {
    webhook_with_payload(Payload::raw(&br#"{"type":"charge.succeeded"}"#[..]))
}

fn webhook_from(provider: &str) -> ReceivedWebhook {
    ReceivedWebhook::new(
        None,
        ProviderName::new(provider).unwrap(),
        Payload::raw(&br#"{"type":"charge.succeeded"}"#[..]),
        WebhookHeaders::new(),
        HttpMethod::Post,
    )
}

async fn wait_for_depth(harness: &Harness, depth: usize) {
    let topic = TopicName::new("webhooks").unwrap();
    for _ in 0..100 {
        if harness.provider.topic_depth(&topic) >= depth {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("expected {} messages on the bus", depth);
}

// ============================================================================
// Acceptance Tests
// ============================================================================

#[tokio::test]
async fn test_valid_webhook_is_accepted_and_published() {
    let harness = harness();
    let event = webhook();
    let expected_id = event.event_id;

    let ack = harness.producer.submit(event).await;
    assert!(ack.is_accepted());
    assert_eq!(ack.event_id, Some(expected_id));

    wait_for_depth(&harness, 1).await;
    assert_eq!(harness.producer.metrics().accepted(), 1);
}

#[tokio::test]
async fn test_published_envelope_round_trips() {
    let harness = harness();
    let event = webhook();
    let expected_id = event.event_id;

    harness.producer.submit(event).await;
    wait_for_depth(&harness, 1).await;

    let topic = TopicName::new("webhooks").unwrap();
    let received = harness
        .client
        .receive(&topic, chrono::Duration::seconds(1))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        received.attributes.get(ATTR_PROVIDER).map(String::as_str),
        Some("stripe")
    );
    assert_eq!(
        received.attributes.get(ATTR_EVENT_ID).map(String::as_str),
        Some(expected_id.as_str().as_str())
    );

    let envelope: ReceivedWebhook = serde_json::from_slice(&received.body).unwrap();
    assert_eq!(envelope.event_id, expected_id);
    assert_eq!(envelope.provider.as_str(), "stripe");
}

// ============================================================================
// Validation Tests
// ============================================================================

#[tokio::test]
async fn test_oversized_payload_is_rejected() {
    let harness = harness_with(
        ProducerConfig {
            max_payload_size: 64,
            ..Default::default()
        },
        RateLimitConfig {
            enabled: false,
            ..Default::default()
        },
    );

    let big = Payload::raw(vec![b'x'; 128]);
    let ack = harness.producer.submit(webhook_with_payload(big)).await;

    assert_eq!(ack.disposition, SubmissionDisposition::Rejected);
    assert!(ack.message.unwrap().contains("exceeds limit"));
    assert_eq!(harness.producer.metrics().rejected(), 1);
    assert_eq!(harness.producer.metrics().accepted(), 0);
}

// ============================================================================
// Rate Limiting Tests
// ============================================================================

#[tokio::test]
async fn test_submissions_beyond_burst_are_rate_limited() {
    let harness = harness_with(
        ProducerConfig::default(),
        RateLimitConfig {
            enabled: true,
            requests_per_second: 1.0,
            burst_capacity: 2.0,
        },
    );

    assert!(harness.producer.submit(webhook()).await.is_accepted());
    assert!(harness.producer.submit(webhook()).await.is_accepted());

    let ack = harness.producer.submit(webhook()).await;
    assert_eq!(ack.disposition, SubmissionDisposition::RateLimited);
    assert!(ack.retry_after.is_some());
    assert_eq!(harness.producer.metrics().rate_limited(), 1);
}

#[tokio::test]
async fn test_rate_limit_is_per_provider() {
    let harness = harness_with(
        ProducerConfig::default(),
        RateLimitConfig {
            enabled: true,
            requests_per_second: 1.0,
            burst_capacity: 1.0,
        },
    );

    assert!(harness.producer.submit(webhook()).await.is_accepted());
    assert_eq!(
        harness.producer.submit(webhook()).await.disposition,
        SubmissionDisposition::RateLimited
    );

    let other = ReceivedWebhook::new(
        None,
        ProviderName::new("github").unwrap(),
        Payload::raw(&b"{}"[..]),
        WebhookHeaders::new(),
        HttpMethod::Post,
    );
    assert!(harness.producer.submit(other).await.is_accepted());
}

// ============================================================================
// Security Policy Tests
// ============================================================================

#[tokio::test]
async fn test_disallowed_method_is_rejected() {
    let harness = harness();
    let mut event = webhook();
    event.http_method = HttpMethod::Get;

    let ack = harness.producer.submit(event).await;
    assert_eq!(ack.disposition, SubmissionDisposition::Rejected);
    assert!(ack.message.unwrap().contains("GET"));
    assert_eq!(harness.producer.metrics().rejected(), 1);
}

#[tokio::test]
async fn test_mismatched_content_type_is_rejected() {
    let harness = harness();
    let mut event = webhook();
    event.headers.insert("Content-Type", "text/html; charset=utf-8");

    let ack = harness.producer.submit(event).await;
    assert_eq!(ack.disposition, SubmissionDisposition::Rejected);
    assert!(ack.message.unwrap().contains("text/html"));
}

#[tokio::test]
async fn test_json_content_type_with_charset_is_accepted() {
    let harness = harness();
    let mut event = webhook();
    event
        .headers
        .insert("Content-Type", "application/json; charset=utf-8");

    assert!(harness.producer.submit(event).await.is_accepted());
}

#[tokio::test]
async fn test_ip_allowlist_gates_submissions() {
    let allowed: std::net::IpAddr = "203.0.113.7".parse().unwrap();
    let harness = harness_with(
        ProducerConfig {
            security: SecurityConfig {
                enable_ip_allowlist: true,
                ip_allowlist: HashMap::from([("stripe".to_string(), vec![allowed])]),
                ..Default::default()
            },
            ..Default::default()
        },
        RateLimitConfig {
            enabled: false,
            ..Default::default()
        },
    );

    let ack = harness
        .producer
        .submit(webhook().with_source_ip(allowed))
        .await;
    assert!(ack.is_accepted());

    let ack = harness
        .producer
        .submit(webhook().with_source_ip("198.51.100.9".parse().unwrap()))
        .await;
    assert_eq!(ack.disposition, SubmissionDisposition::Rejected);

    // Unknown source cannot be checked against the allowlist
    let ack = harness.producer.submit(webhook()).await;
    assert_eq!(ack.disposition, SubmissionDisposition::Rejected);
}

#[tokio::test]
async fn test_ip_allowlist_is_scoped_per_provider() {
    let allowed: std::net::IpAddr = "203.0.113.7".parse().unwrap();
    let harness = harness_with(
        ProducerConfig {
            security: SecurityConfig {
                enable_ip_allowlist: true,
                ip_allowlist: HashMap::from([("stripe".to_string(), vec![allowed])]),
                ..Default::default()
            },
            ..Default::default()
        },
        RateLimitConfig {
            enabled: false,
            ..Default::default()
        },
    );

    // The same source address is only trusted for the provider it is
    // allowlisted under.
    let ack = harness
        .producer
        .submit(webhook_from("github").with_source_ip(allowed))
        .await;
    assert_eq!(ack.disposition, SubmissionDisposition::Rejected);

    let ack = harness
        .producer
        .submit(webhook_from("stripe").with_source_ip(allowed))
        .await;
    assert!(ack.is_accepted());
}

#[tokio::test]
async fn test_provider_name_pattern_rejects_nonmatching_provider() {
    let harness = harness_with(
        ProducerConfig {
            security: SecurityConfig {
                provider_name_pattern: Some(Regex::new("^github$").unwrap()),
                ..Default::default()
            },
            ..Default::default()
        },
        RateLimitConfig {
            enabled: false,
            ..Default::default()
        },
    );

    let ack = harness.producer.submit(webhook_from("stripe")).await;
    assert_eq!(ack.disposition, SubmissionDisposition::Rejected);
    assert!(ack.message.unwrap().contains("stripe"));

    assert!(harness.producer.submit(webhook_from("github")).await.is_accepted());
}

#[tokio::test]
async fn test_provider_name_check_can_be_disabled() {
    let harness = harness_with(
        ProducerConfig {
            security: SecurityConfig {
                validate_provider_name: false,
                provider_name_pattern: Some(Regex::new("^github$").unwrap()),
                ..Default::default()
            },
            ..Default::default()
        },
        RateLimitConfig {
            enabled: false,
            ..Default::default()
        },
    );

    assert!(harness.producer.submit(webhook_from("stripe")).await.is_accepted());
}

#[tokio::test]
async fn test_size_check_can_be_disabled() {
    let harness = harness_with(
        ProducerConfig {
            max_payload_size: 8,
            security: SecurityConfig {
                validate_payload_size: false,
                ..Default::default()
            },
            ..Default::default()
        },
        RateLimitConfig {
            enabled: false,
            ..Default::default()
        },
    );

    assert!(harness.producer.submit(webhook()).await.is_accepted());
}

// ============================================================================
// Breaker Admission Tests
// ============================================================================

#[tokio::test]
async fn test_open_circuit_rejects_new_submissions() {
    let provider = Arc::new(InMemoryProvider::new(InMemoryConfig::default()));
    let client = BusClient::new(provider);
    let resilience = Arc::new(ResiliencePolicy::new(ResilienceConfig::default()));
    resilience.force_open_breaker("stripe");

    let producer = WebhookProducer::new(
        client,
        ProducerConfig::default(),
        Arc::new(RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..Default::default()
        })),
        resilience.clone(),
    )
    .unwrap();

    let ack = producer.submit(webhook()).await;
    assert_eq!(ack.disposition, SubmissionDisposition::Rejected);
    assert!(ack.message.unwrap().contains("unavailable"));

    resilience.reset_breaker("stripe");
    assert!(producer.submit(webhook()).await.is_accepted());
}

// ============================================================================
// Compression Tests
// ============================================================================

#[tokio::test]
async fn test_large_payloads_are_compressed_in_flight() {
    let harness = harness_with(
        ProducerConfig {
            compression_threshold: 1024,
            ..Default::default()
        },
        RateLimitConfig {
            enabled: false,
            ..Default::default()
        },
    );

    let body = vec![b'a'; 8192];
    harness
        .producer
        .submit(webhook_with_payload(Payload::raw(body.clone())))
        .await;
    wait_for_depth(&harness, 1).await;

    let topic = TopicName::new("webhooks").unwrap();
    let received = harness
        .client
        .receive(&topic, chrono::Duration::seconds(1))
        .await
        .unwrap()
        .unwrap();

    let envelope: ReceivedWebhook = serde_json::from_slice(&received.body).unwrap();
    assert!(envelope.payload.is_compressed());
    assert_eq!(envelope.payload.original_size(), 8192);
    assert_eq!(envelope.payload_bytes().unwrap().as_ref(), body.as_slice());
}

#[tokio::test]
async fn test_small_payloads_stay_raw() {
    let harness = harness();
    harness.producer.submit(webhook()).await;
    wait_for_depth(&harness, 1).await;

    let topic = TopicName::new("webhooks").unwrap();
    let received = harness
        .client
        .receive(&topic, chrono::Duration::seconds(1))
        .await
        .unwrap()
        .unwrap();

    let envelope: ReceivedWebhook = serde_json::from_slice(&received.body).unwrap();
    assert!(!envelope.payload.is_compressed());
}
