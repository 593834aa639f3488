//! Integration tests for exactly-once processing
//!
//! These tests run real webhooks through the full pipeline: producer
//! submission, in-memory bus, consumer poll, deduplication, verification,
//! and processor dispatch.

mod common;

use common::{timestamped_webhook, unsigned_webhook, RelayHarness, Verification};
use std::time::Duration;
use webhook_relay_core::EventId;
use webhook_relay_service::SubmissionDisposition;

const SECRET: &str = "whsec_integration";

/// A correctly signed timestamped webhook travels the whole pipeline and
/// is processed exactly once.
#[tokio::test]
async fn test_signed_webhook_processed_exactly_once() {
    let harness = RelayHarness::new(Verification::TimestampedHmac {
        secret: SECRET,
        tolerance: Duration::from_secs(15 * 60),
    });

    let webhook = timestamped_webhook(
        EventId::new(),
        r#"{"type":"invoice.paid","amount":4200}"#,
        SECRET,
        chrono::Utc::now().timestamp(),
    );

    let ack = harness.producer.submit(webhook).await;
    assert_eq!(ack.disposition, SubmissionDisposition::Accepted);

    harness.wait_for_depth(1).await;
    harness.drain().await;

    assert_eq!(harness.processor.call_count(), 1);
    assert!(harness.dead_letters().is_empty());
}

/// A second delivery of the same event id is acknowledged without reaching
/// the processor again.
#[tokio::test]
async fn test_duplicate_event_id_processed_once() {
    let harness = RelayHarness::new(Verification::Open);
    let event_id = EventId::new();

    let first = unsigned_webhook(event_id, r#"{"n":1}"#);
    let second = unsigned_webhook(event_id, r#"{"n":1}"#);

    assert!(harness.producer.submit(first).await.is_accepted());
    assert!(harness.producer.submit(second).await.is_accepted());

    harness.wait_for_depth(2).await;
    harness.drain().await;

    assert_eq!(harness.processor.call_count(), 1);
    assert!(harness.dead_letters().is_empty());
    assert_eq!(harness.bus.topic_depth(&harness.topic), 0);
}

/// Distinct events from the same provider are each processed.
#[tokio::test]
async fn test_distinct_events_all_processed() {
    let harness = RelayHarness::new(Verification::Open);

    for n in 0..5 {
        let webhook = unsigned_webhook(EventId::new(), &format!(r#"{{"n":{n}}}"#));
        assert!(harness.producer.submit(webhook).await.is_accepted());
    }

    harness.wait_for_depth(5).await;
    harness.drain().await;

    assert_eq!(harness.processor.call_count(), 5);
}
