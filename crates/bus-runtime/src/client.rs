//! Client traits and the validating facade for bus operations.

use crate::error::BusError;
use crate::message::{Message, MessageId, ReceiptHandle, ReceivedMessage, TopicName};
use crate::provider::ProviderType;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Interface implemented by specific bus providers
#[async_trait]
pub trait BusProvider: Send + Sync {
    /// Publish single message to topic
    async fn publish(&self, topic: &TopicName, message: &Message) -> Result<MessageId, BusError>;

    /// Receive single message from topic
    ///
    /// Returns `None` when no message becomes available within `timeout`.
    /// A received message is invisible to other consumers until its
    /// visibility timeout elapses or it is nacked.
    async fn receive(
        &self,
        topic: &TopicName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, BusError>;

    /// Receive up to `max_messages` from topic
    async fn receive_batch(
        &self,
        topic: &TopicName,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, BusError>;

    /// Mark message as successfully processed
    async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), BusError>;

    /// Return message to its topic for redelivery
    async fn nack(&self, receipt: &ReceiptHandle) -> Result<(), BusError>;

    /// Move message to the topic's dead letter queue
    async fn dead_letter(&self, receipt: &ReceiptHandle, reason: &str) -> Result<(), BusError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Get maximum message size in bytes
    fn max_message_size(&self) -> usize {
        self.provider_type().max_message_size()
    }
}

/// Validating facade over a [`BusProvider`]
///
/// Enforces provider-independent constraints (message size) before
/// delegating, so call sites get consistent errors regardless of the
/// backing provider.
#[derive(Clone)]
pub struct BusClient {
    provider: Arc<dyn BusProvider>,
}

impl BusClient {
    /// Create client wrapping the given provider
    pub fn new(provider: Arc<dyn BusProvider>) -> Self {
        Self { provider }
    }

    /// Publish single message to topic
    pub async fn publish(
        &self,
        topic: &TopicName,
        message: Message,
    ) -> Result<MessageId, BusError> {
        let max_size = self.provider.max_message_size();
        if message.body.len() > max_size {
            return Err(BusError::MessageTooLarge {
                size: message.body.len(),
                max_size,
            });
        }

        self.provider.publish(topic, &message).await
    }

    /// Receive single message from topic
    pub async fn receive(
        &self,
        topic: &TopicName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, BusError> {
        self.provider.receive(topic, timeout).await
    }

    /// Receive up to `max_messages` from topic
    pub async fn receive_batch(
        &self,
        topic: &TopicName,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, BusError> {
        self.provider.receive_batch(topic, max_messages, timeout).await
    }

    /// Mark message as successfully processed
    pub async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), BusError> {
        self.provider.ack(receipt).await
    }

    /// Return message to its topic for redelivery
    pub async fn nack(&self, receipt: &ReceiptHandle) -> Result<(), BusError> {
        self.provider.nack(receipt).await
    }

    /// Move message to the topic's dead letter queue
    pub async fn dead_letter(&self, receipt: &ReceiptHandle, reason: &str) -> Result<(), BusError> {
        self.provider.dead_letter(receipt, reason).await
    }

    /// Get provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }
}
