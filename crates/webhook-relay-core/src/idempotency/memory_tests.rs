use super::*;
use crate::idempotency::ClaimOutcome;

const TTL: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_first_claim_wins() {
    let store = InMemoryIdempotencyStore::new();
    let outcome = store.claim("stripe:evt_1", TTL).await.unwrap();
    assert_eq!(outcome, ClaimOutcome::Claimed);
    assert!(outcome.is_claimed());
}

#[tokio::test]
async fn test_second_claim_is_rejected() {
    let store = InMemoryIdempotencyStore::new();
    store.claim("stripe:evt_1", TTL).await.unwrap();

    let outcome = store.claim("stripe:evt_1", TTL).await.unwrap();
    assert_eq!(outcome, ClaimOutcome::AlreadyClaimed);
    assert!(!outcome.is_claimed());
}

#[tokio::test]
async fn test_distinct_keys_are_independent() {
    let store = InMemoryIdempotencyStore::new();
    assert!(store.claim("a", TTL).await.unwrap().is_claimed());
    assert!(store.claim("b", TTL).await.unwrap().is_claimed());
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn test_expired_claim_can_be_retaken() {
    let store = InMemoryIdempotencyStore::new();
    store
        .claim("stripe:evt_1", Duration::from_millis(10))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;

    let outcome = store.claim("stripe:evt_1", TTL).await.unwrap();
    assert_eq!(outcome, ClaimOutcome::Claimed);
}

#[tokio::test]
async fn test_release_frees_the_key() {
    let store = InMemoryIdempotencyStore::new();
    store.claim("stripe:evt_1", TTL).await.unwrap();
    store.release("stripe:evt_1").await.unwrap();

    let outcome = store.claim("stripe:evt_1", TTL).await.unwrap();
    assert_eq!(outcome, ClaimOutcome::Claimed);
}

#[tokio::test]
async fn test_put_and_get_round_trip() {
    let store = InMemoryIdempotencyStore::new();
    store
        .put("resp:evt_1", Bytes::from_static(b"cached"), TTL)
        .await
        .unwrap();

    let value = store.get("resp:evt_1").await.unwrap();
    assert_eq!(value, Some(Bytes::from_static(b"cached")));
    assert_eq!(store.get("resp:missing").await.unwrap(), None);
}

#[tokio::test]
async fn test_get_hides_expired_values() {
    let store = InMemoryIdempotencyStore::new();
    store
        .put(
            "resp:evt_1",
            Bytes::from_static(b"stale"),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(store.get("resp:evt_1").await.unwrap(), None);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_claim_without_value_returns_none_on_get() {
    let store = InMemoryIdempotencyStore::new();
    store.claim("stripe:evt_1", TTL).await.unwrap();
    assert_eq!(store.get("stripe:evt_1").await.unwrap(), None);
}

#[tokio::test]
async fn test_concurrent_claims_have_single_winner() {
    let store = Arc::new(InMemoryIdempotencyStore::new());

    let mut handles = Vec::new();
    for _ in 0..32 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.claim("contested", TTL).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_claimed() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
