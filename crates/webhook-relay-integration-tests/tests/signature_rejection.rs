//! Integration tests for signature verification at the consumer
//!
//! Verification runs on the consumer side so a forged event that slipped
//! onto the bus is still caught. Failed verification is terminal: the
//! event is dead-lettered and never reaches a processor.

mod common;

use common::{hmac_signed_webhook, timestamped_webhook, unsigned_webhook, RelayHarness, Verification};
use std::time::Duration;
use webhook_relay_core::EventId;

const SECRET: &str = "whsec_integration";
const TOLERANCE: Duration = Duration::from_secs(15 * 60);

/// An event signed with the wrong secret is dead-lettered without ever
/// reaching the processor.
#[tokio::test]
async fn test_wrong_secret_dead_letters_without_processing() {
    let harness = RelayHarness::new(Verification::Hmac { secret: SECRET });

    let forged = hmac_signed_webhook(EventId::new(), r#"{"evil":true}"#, "wrong-secret");
    assert!(harness.producer.submit(forged).await.is_accepted());

    harness.wait_for_depth(1).await;
    harness.drain().await;

    assert_eq!(harness.processor.call_count(), 0);
    let dead = harness.dead_letters();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].reason.contains("Signature does not match"));
}

/// A correctly signed HMAC event passes and is processed.
#[tokio::test]
async fn test_correct_hmac_signature_passes() {
    let harness = RelayHarness::new(Verification::Hmac { secret: SECRET });

    let webhook = hmac_signed_webhook(EventId::new(), r#"{"action":"opened"}"#, SECRET);
    assert!(harness.producer.submit(webhook).await.is_accepted());

    harness.wait_for_depth(1).await;
    harness.drain().await;

    assert_eq!(harness.processor.call_count(), 1);
    assert!(harness.dead_letters().is_empty());
}

/// A signature whose timestamp is older than the replay tolerance is
/// rejected even though the digest itself is valid.
#[tokio::test]
async fn test_stale_timestamp_dead_letters() {
    let harness = RelayHarness::new(Verification::TimestampedHmac {
        secret: SECRET,
        tolerance: TOLERANCE,
    });

    let sixteen_minutes_ago = chrono::Utc::now().timestamp() - 16 * 60;
    let stale = timestamped_webhook(
        EventId::new(),
        r#"{"type":"charge.succeeded"}"#,
        SECRET,
        sixteen_minutes_ago,
    );
    assert!(harness.producer.submit(stale).await.is_accepted());

    harness.wait_for_depth(1).await;
    harness.drain().await;

    assert_eq!(harness.processor.call_count(), 0);
    let dead = harness.dead_letters();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].reason.contains("timestamp"));
}

/// With verification required by default, an unsigned event from a provider
/// with no registered verifier is dead-lettered rather than passed through.
#[tokio::test]
async fn test_required_verification_rejects_unsigned_event() {
    let harness = RelayHarness::new(Verification::Hmac { secret: SECRET });

    let unsigned = unsigned_webhook(EventId::new(), r#"{"bare":true}"#);
    assert!(harness.producer.submit(unsigned).await.is_accepted());

    harness.wait_for_depth(1).await;
    harness.drain().await;

    assert_eq!(harness.processor.call_count(), 0);
    assert_eq!(harness.dead_letters().len(), 1);
}
