//! # Bus Runtime
//!
//! Provider-agnostic event bus runtime for at-least-once message delivery.
//!
//! This library provides:
//! - Provider-agnostic publish/receive/ack operations
//! - At-least-once delivery with per-message delivery counts
//! - Visibility timeouts for in-flight messages
//! - Dead letter queue support with automatic max-delivery enforcement
//! - Partition assignment by message key
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all bus operations
//! - [`message`] - Message structures and receipt handles
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Client traits and the validating facade

// Module declarations
pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{BusClient, BusProvider};
pub use error::{BusError, SerializationError, ValidationError};
pub use message::{
    Message, MessageId, PartitionKey, ReceiptHandle, ReceivedMessage, Timestamp, TopicName,
};
pub use provider::{InMemoryConfig, ProviderType};
pub use providers::{DeadLetteredMessage, InMemoryProvider};
