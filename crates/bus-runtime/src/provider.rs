//! Provider types and configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Enumeration of supported bus providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    InMemory,
}

impl ProviderType {
    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::InMemory => 10 * 1024 * 1024, // 10MB
        }
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum messages held per topic before publishes are rejected
    pub max_topic_size: usize,
    /// Number of partitions per topic
    pub partition_count: u32,
    /// Deliveries after which a message is moved to the dead letter queue
    pub max_delivery_count: u32,
    /// Default TTL applied when a message carries none
    pub default_message_ttl: Option<Duration>,
    /// How long a received message stays invisible before redelivery
    pub visibility_timeout: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_topic_size: 10000,
            partition_count: 4,
            max_delivery_count: 5,
            default_message_ttl: None,
            visibility_timeout: Duration::minutes(5),
        }
    }
}
