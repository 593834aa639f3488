//! In-memory idempotency store for local deployments and tests.

use super::{ClaimOutcome, IdempotencyError, IdempotencyStore};
use crate::Timestamp;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    value: Option<Bytes>,
    expires_at: Timestamp,
}

impl Entry {
    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

/// Process-local idempotency store
///
/// Entries expire lazily: an expired claim is treated as absent on the next
/// access and overwritten in place, so no background sweeper is needed.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdempotencyStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryIdempotencyStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired entries, for tests and diagnostics
    pub async fn len(&self) -> usize {
        let now = Timestamp::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Check whether the store holds no unexpired entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<ClaimOutcome, IdempotencyError> {
        let now = Timestamp::now();
        // Single write lock spans the check and the set, making the claim atomic.
        let mut entries = self.entries.write().await;

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(ClaimOutcome::AlreadyClaimed),
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: None,
                        expires_at: now.add_duration(ttl),
                    },
                );
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<(), IdempotencyError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), IdempotencyError> {
        let now = Timestamp::now();
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Some(value),
                expires_at: now.add_duration(ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, IdempotencyError> {
        let now = Timestamp::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.value.clone()))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
