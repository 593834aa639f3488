//! # Service Configuration
//!
//! Layered configuration for the relay service. All fields carry serde
//! defaults, so an absent file or an empty environment yields a working
//! in-memory setup. Sources are merged in order: well-known file paths,
//! an optional explicit file named by `WR_CONFIG_FILE`, then environment
//! variables prefixed `WR` (nested keys separated by `__`).

use crate::rate_limit::RateLimitConfig;
use crate::resilience::ResilienceConfig;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use webhook_relay_core::circuit_breaker::CircuitBreakerConfig;
use webhook_relay_core::consumer::ConsumerPipelineConfig;

use crate::consumer_loop::ConsumerLoopConfig;
use crate::producer::{ProducerConfig, SecurityConfig};
use regex::Regex;
use std::net::IpAddr;
use webhook_relay_core::webhook::HttpMethod;

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Complete relay service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Ingestion side settings
    pub producer: ProducerSettings,

    /// Consumption side settings
    pub consumer: ConsumerSettings,

    /// Per-provider submission rate limiting
    pub rate_limit: RateLimitSettings,

    /// Publish retry schedule
    pub retry: RetrySettings,

    /// Per-provider retry schedules overriding the global one
    pub retry_overrides: HashMap<String, RetrySettings>,

    /// Publish circuit breaker
    pub circuit_breaker: CircuitBreakerSettings,

    /// Logging output
    pub logging: LoggingConfig,

    /// Signature verification per provider
    pub verification: VerificationSettings,
}

impl RelayConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/webhook-relay/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name("config/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Ok(explicit_path) = std::env::var("WR_CONFIG_FILE") {
            if !explicit_path.is_empty() {
                builder = builder.add_source(
                    config::File::with_name(&explicit_path)
                        .required(true)
                        .format(config::FileFormat::Yaml),
                );
            }
        }

        builder
            .add_source(config::Environment::with_prefix("WR").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Reject operator configuration the service cannot run with
    pub fn validate(&self) -> Result<(), String> {
        if self.producer.topic.is_empty() {
            return Err("producer.topic must not be empty".to_string());
        }
        if self.consumer.topic.is_empty() {
            return Err("consumer.topic must not be empty".to_string());
        }
        if self.producer.max_payload_size == 0 {
            return Err("producer.max_payload_size must be positive".to_string());
        }
        if self.producer.security.allowed_methods.is_empty() {
            return Err("producer.security.allowed_methods must not be empty".to_string());
        }
        for method in &self.producer.security.allowed_methods {
            if method.parse::<HttpMethod>().is_err() {
                return Err(format!(
                    "producer.security.allowed_methods contains unknown method '{}'",
                    method
                ));
            }
        }
        if let Some(pattern) = &self.producer.security.provider_name_pattern {
            if Regex::new(pattern).is_err() {
                return Err(format!(
                    "producer.security.provider_name_pattern '{}' is not a valid regex",
                    pattern
                ));
            }
        }
        for (provider, addresses) in &self.producer.security.ip_allowlist {
            if provider.is_empty() {
                return Err(
                    "producer.security.ip_allowlist contains an empty provider name".to_string(),
                );
            }
            for ip in addresses {
                if ip.parse::<IpAddr>().is_err() {
                    return Err(format!(
                        "producer.security.ip_allowlist.{} contains invalid address '{}'",
                        provider, ip
                    ));
                }
            }
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err("retry.backoff_multiplier must be at least 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err("retry.jitter_factor must be between 0.0 and 1.0".to_string());
        }
        for (provider, settings) in &self.retry_overrides {
            if provider.is_empty() {
                return Err("retry_overrides keys must not be empty".to_string());
            }
            if settings.backoff_multiplier < 1.0 {
                return Err(format!(
                    "retry_overrides.{}.backoff_multiplier must be at least 1.0",
                    provider
                ));
            }
            if !(0.0..=1.0).contains(&settings.jitter_factor) {
                return Err(format!(
                    "retry_overrides.{}.jitter_factor must be between 0.0 and 1.0",
                    provider
                ));
            }
        }
        if self.circuit_breaker.failure_rate_threshold <= 0.0
            || self.circuit_breaker.failure_rate_threshold > 1.0
        {
            return Err(
                "circuit_breaker.failure_rate_threshold must be in (0.0, 1.0]".to_string(),
            );
        }
        if self.rate_limit.enabled && self.rate_limit.requests_per_second <= 0.0 {
            return Err("rate_limit.requests_per_second must be positive".to_string());
        }
        for provider in &self.verification.providers {
            if provider.name.is_empty() {
                return Err("verification provider name must not be empty".to_string());
            }
            if provider.scheme != VerificationScheme::None && provider.secret.is_none() {
                return Err(format!(
                    "verification provider '{}' uses scheme {:?} but has no secret",
                    provider.name, provider.scheme
                ));
            }
        }
        Ok(())
    }

    /// Resilience settings for the publish path
    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig {
            retry: self.retry.to_policy(),
            retry_overrides: self
                .retry_overrides
                .iter()
                .map(|(provider, settings)| (provider.clone(), settings.to_policy()))
                .collect(),
            circuit_breaker: self.circuit_breaker.to_config(),
        }
    }
}

// ============================================================================
// Producer Settings
// ============================================================================

/// Ingestion and publish configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    /// Topic published to
    pub topic: String,

    /// Largest accepted payload in bytes
    pub max_payload_size: usize,

    /// Compress large payloads before publish
    pub compression_enabled: bool,

    /// Payload size at which compression kicks in
    pub compression_threshold: usize,

    /// Optional message TTL in seconds
    pub message_ttl_seconds: Option<u64>,

    /// Request-shape policy for inbound webhooks
    pub security: SecuritySettings,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        let base = ProducerConfig::default();
        Self {
            topic: base.topic,
            max_payload_size: base.max_payload_size,
            compression_enabled: base.compression_enabled,
            compression_threshold: base.compression_threshold,
            message_ttl_seconds: None,
            security: SecuritySettings::default(),
        }
    }
}

impl ProducerSettings {
    pub fn to_config(&self) -> ProducerConfig {
        ProducerConfig {
            topic: self.topic.clone(),
            max_payload_size: self.max_payload_size,
            compression_enabled: self.compression_enabled,
            compression_threshold: self.compression_threshold,
            message_ttl: self.message_ttl_seconds.map(Duration::from_secs),
            security: self.security.to_config(),
        }
    }
}

/// Request-shape policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Accepted HTTP methods, by canonical name
    pub allowed_methods: Vec<String>,

    /// Accepted content types; empty means no restriction
    pub allowed_content_types: Vec<String>,

    /// Enforce the payload size limit
    pub validate_payload_size: bool,

    /// Check provider names against the configured pattern
    pub validate_provider_name: bool,

    /// Regular expression provider names must match
    pub provider_name_pattern: Option<String>,

    /// Require submissions from an allowlisted source address
    pub enable_ip_allowlist: bool,

    /// Allowlisted source addresses per provider
    pub ip_allowlist: HashMap<String, Vec<String>>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        let base = SecurityConfig::default();
        Self {
            allowed_methods: base
                .allowed_methods
                .iter()
                .map(|m| m.as_str().to_string())
                .collect(),
            allowed_content_types: base.allowed_content_types,
            validate_payload_size: base.validate_payload_size,
            validate_provider_name: base.validate_provider_name,
            provider_name_pattern: None,
            enable_ip_allowlist: base.enable_ip_allowlist,
            ip_allowlist: HashMap::new(),
        }
    }
}

impl SecuritySettings {
    /// Convert to the producer's runtime policy
    ///
    /// Unparsable entries are dropped here; `RelayConfig::validate` has
    /// already rejected configurations containing them.
    pub fn to_config(&self) -> SecurityConfig {
        SecurityConfig {
            allowed_methods: self
                .allowed_methods
                .iter()
                .filter_map(|m| m.parse::<HttpMethod>().ok())
                .collect(),
            allowed_content_types: self.allowed_content_types.clone(),
            validate_payload_size: self.validate_payload_size,
            validate_provider_name: self.validate_provider_name,
            provider_name_pattern: self
                .provider_name_pattern
                .as_deref()
                .and_then(|pattern| Regex::new(pattern).ok()),
            enable_ip_allowlist: self.enable_ip_allowlist,
            ip_allowlist: self
                .ip_allowlist
                .iter()
                .map(|(provider, addresses)| {
                    (
                        provider.clone(),
                        addresses
                            .iter()
                            .filter_map(|ip| ip.parse::<IpAddr>().ok())
                            .collect(),
                    )
                })
                .collect(),
        }
    }
}

// ============================================================================
// Consumer Settings
// ============================================================================

/// Consumption and processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Topic consumed from
    pub topic: String,

    /// Receive wait per poll in milliseconds
    pub poll_timeout_ms: u64,

    /// Pause after a receive error in milliseconds
    pub error_backoff_ms: u64,

    /// How long a processed event id stays deduplicated, in seconds
    pub dedup_ttl_seconds: u64,

    /// Per-event processing deadline in seconds
    pub processing_deadline_seconds: u64,

    /// Retry events whose processing exceeded the deadline
    pub retry_on_timeout: bool,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            topic: "webhooks".to_string(),
            poll_timeout_ms: 1000,
            error_backoff_ms: 1000,
            dedup_ttl_seconds: 7 * 24 * 60 * 60,
            processing_deadline_seconds: 30,
            retry_on_timeout: true,
        }
    }
}

impl ConsumerSettings {
    pub fn to_pipeline_config(&self) -> ConsumerPipelineConfig {
        ConsumerPipelineConfig {
            dedup_ttl: Duration::from_secs(self.dedup_ttl_seconds),
            processing_deadline: Duration::from_secs(self.processing_deadline_seconds),
            retry_on_timeout: self.retry_on_timeout,
        }
    }

    pub fn to_loop_config(&self) -> ConsumerLoopConfig {
        ConsumerLoopConfig {
            topic: self.topic.clone(),
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
        }
    }
}

// ============================================================================
// Rate Limit Settings
// ============================================================================

/// Per-provider token bucket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub requests_per_second: f64,
    pub burst_capacity: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let base = RateLimitConfig::default();
        Self {
            enabled: base.enabled,
            requests_per_second: base.requests_per_second,
            burst_capacity: base.burst_capacity,
        }
    }
}

impl RateLimitSettings {
    pub fn to_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            enabled: self.enabled,
            requests_per_second: self.requests_per_second,
            burst_capacity: self.burst_capacity,
        }
    }
}

// ============================================================================
// Retry Settings
// ============================================================================

/// Publish retry schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
    pub jitter_factor: f64,
    pub retry_timeouts: bool,
    pub retry_connection_errors: bool,
    pub retry_server_errors: bool,
    pub retry_client_errors: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let base = RetryPolicy::default();
        Self {
            max_attempts: base.max_attempts,
            initial_delay_ms: base.initial_delay.as_millis() as u64,
            max_delay_ms: base.max_delay.as_millis() as u64,
            backoff_multiplier: base.backoff_multiplier,
            use_jitter: base.use_jitter,
            jitter_factor: base.jitter_factor,
            retry_timeouts: base.retry_timeouts,
            retry_connection_errors: base.retry_connection_errors,
            retry_server_errors: base.retry_server_errors,
            retry_client_errors: base.retry_client_errors,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            use_jitter: self.use_jitter,
            jitter_factor: self.jitter_factor,
            retry_timeouts: self.retry_timeouts,
            retry_connection_errors: self.retry_connection_errors,
            retry_server_errors: self.retry_server_errors,
            retry_client_errors: self.retry_client_errors,
        }
    }
}

// ============================================================================
// Circuit Breaker Settings
// ============================================================================

/// Publish circuit breaker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub sliding_window_size: usize,
    pub minimum_calls: u32,
    pub failure_rate_threshold: f64,
    pub slow_call_rate_threshold: f64,
    pub slow_call_duration_ms: u64,
    pub recovery_timeout_seconds: u64,
    pub success_threshold: u32,
    pub operation_timeout_seconds: u64,
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let base = CircuitBreakerConfig::default();
        Self {
            sliding_window_size: base.sliding_window_size,
            minimum_calls: base.minimum_calls,
            failure_rate_threshold: base.failure_rate_threshold,
            slow_call_rate_threshold: base.slow_call_rate_threshold,
            slow_call_duration_ms: base.slow_call_duration.as_millis() as u64,
            recovery_timeout_seconds: base.recovery_timeout.as_secs(),
            success_threshold: base.success_threshold,
            operation_timeout_seconds: base.operation_timeout.as_secs(),
            half_open_max_requests: base.half_open_max_requests,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            name: "bus-publish".to_string(),
            sliding_window_size: self.sliding_window_size,
            minimum_calls: self.minimum_calls,
            failure_rate_threshold: self.failure_rate_threshold,
            slow_call_rate_threshold: self.slow_call_rate_threshold,
            slow_call_duration: Duration::from_millis(self.slow_call_duration_ms),
            recovery_timeout: Duration::from_secs(self.recovery_timeout_seconds),
            success_threshold: self.success_threshold,
            operation_timeout: Duration::from_secs(self.operation_timeout_seconds),
            half_open_max_requests: self.half_open_max_requests,
        }
    }
}

// ============================================================================
// Verification Settings
// ============================================================================

/// Signature verification scheme for a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationScheme {
    /// HMAC-SHA256 of the raw payload, hex digest in a single header
    HmacSha256,

    /// Timestamped HMAC-SHA256 with replay tolerance
    TimestampedHmac,

    /// No verification for this provider
    None,
}

/// Per-provider verification entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderVerification {
    /// Provider name events arrive under
    pub name: String,

    /// Scheme the provider signs with
    pub scheme: VerificationScheme,

    /// Shared secret for HMAC schemes
    pub secret: Option<String>,

    /// Override for the signature header name
    pub header: Option<String>,

    /// Replay tolerance in seconds for timestamped schemes
    pub tolerance_seconds: Option<u64>,
}

/// Signature verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    /// Dead-letter events from providers with no registered verifier
    pub require_by_default: bool,

    /// Providers with configured verification
    pub providers: Vec<ProviderVerification>,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            require_by_default: false,
            providers: Vec::new(),
        }
    }
}

// ============================================================================
// Logging Settings
// ============================================================================

/// Logging output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter when RUST_LOG is unset
    pub level: String,

    /// Emit JSON structured logs instead of human-readable output
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
