//! # Idempotency Store
//!
//! Exactly-once processing guard. The consumer claims a dedup key before
//! dispatching an event; a second delivery of the same key observes the
//! existing claim and is acknowledged without reprocessing.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

mod memory;

pub use memory::InMemoryIdempotencyStore;

// ============================================================================
// Errors
// ============================================================================

/// Error raised by an idempotency store backend
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdempotencyError {
    #[error("Idempotency store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Idempotency store backend error: {message}")]
    Backend { message: String },
}

// ============================================================================
// Claim Outcome
// ============================================================================

/// Result of an atomic claim attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Key was free and is now claimed by this caller
    Claimed,
    /// Key already claimed within its TTL
    AlreadyClaimed,
}

impl ClaimOutcome {
    /// Whether this caller won the claim
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed)
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Key-value store with atomic claim semantics
///
/// `claim` must be a single atomic check-and-set: two concurrent calls for
/// the same key must never both observe `Claimed`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claim a key for the given TTL
    async fn claim(&self, key: &str, ttl: Duration) -> Result<ClaimOutcome, IdempotencyError>;

    /// Release a claim so a later delivery can reprocess the event
    async fn release(&self, key: &str) -> Result<(), IdempotencyError>;

    /// Store a value under a key with a TTL
    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), IdempotencyError>;

    /// Fetch an unexpired value, if present
    async fn get(&self, key: &str) -> Result<Option<Bytes>, IdempotencyError>;
}
