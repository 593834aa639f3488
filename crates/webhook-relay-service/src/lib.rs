//! # Webhook Relay Service
//!
//! Service-side wiring for the webhook relay: the producer pipeline that
//! accepts webhooks and publishes them to the event bus, the resilience
//! layer guarding that publish path (retry schedule, rate limiting, circuit
//! breaker), concrete signature verifiers, and the consumer loop that drains
//! the bus through the core processing pipeline.
//!
//! The domain model and the pipeline itself live in `webhook-relay-core`;
//! the bus abstraction lives in `bus-runtime`. This crate is the glue plus
//! the `webhook-relay` binary.

pub mod config;
pub mod consumer_loop;
pub mod delivery;
pub mod producer;
pub mod rate_limit;
pub mod resilience;
pub mod retry;
pub mod verifiers;

pub use config::RelayConfig;
pub use consumer_loop::{ConsumerLoop, ConsumerLoopConfig};
pub use delivery::LogDeliveryProcessor;
pub use producer::{
    ProducerConfig, SecurityConfig, SubmissionAck, SubmissionDisposition, WebhookProducer,
};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use resilience::{PublishError, ResilienceConfig, ResiliencePolicy};
pub use retry::{classify_bus_error, FailureKind, RetryPolicy, RetryState};
pub use verifiers::{HmacSha256Verifier, NoopVerifier, TimestampedHmacVerifier};
