//! # Rate Limiting Module
//!
//! Per-key token bucket rate limiting for the ingestion path. Keys are
//! typically provider names or source addresses; each key gets its own
//! bucket so one noisy source cannot starve the rest.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Buckets idle longer than this are pruned when the map grows large
const IDLE_BUCKET_AGE: Duration = Duration::from_secs(60);
const PRUNE_THRESHOLD: usize = 10_000;

// ============================================================================
// Configuration
// ============================================================================

/// Token bucket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enforced at all
    pub enabled: bool,

    /// Sustained refill rate in requests per second
    pub requests_per_second: f64,

    /// Bucket capacity, the largest tolerated burst
    pub burst_capacity: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 50.0,
            burst_capacity: 100.0,
        }
    }
}

// ============================================================================
// Decision
// ============================================================================

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitDecision {
    /// Request admitted, token consumed
    Allowed,
    /// Request rejected; a token becomes available after `retry_after`
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

// ============================================================================
// Rate Limiter
// ============================================================================

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-key token bucket rate limiter
///
/// Admission is a synchronous check on the hot ingestion path, so the state
/// sits behind a plain mutex rather than an async lock.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Create limiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a request for this key is admitted
    pub fn check(&self, key: &str) -> RateLimitDecision {
        if !self.config.enabled {
            return RateLimitDecision::Allowed;
        }

        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(buckets) => buckets,
            // A poisoned lock means a panic mid-update; admit rather than
            // reject all traffic for the rest of the process lifetime.
            Err(_) => return RateLimitDecision::Allowed,
        };

        if buckets.len() > PRUNE_THRESHOLD {
            buckets.retain(|_, b| now.duration_since(b.last_refill) < IDLE_BUCKET_AGE);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.config.burst_capacity,
            last_refill: now,
        });

        // Refill proportionally to elapsed time, capped at burst capacity
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.requests_per_second)
            .min(self.config.burst_capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitDecision::Allowed
        } else {
            let deficit = 1.0 - bucket.tokens;
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs_f64(deficit / self.config.requests_per_second),
            }
        }
    }

    /// Number of tracked keys, for tests and diagnostics
    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
