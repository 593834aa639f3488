//! In-memory bus provider implementation for testing and single-node use.
//!
//! This module provides a fully functional in-memory bus that:
//! - Delivers each message at least once, with per-message delivery counts
//! - Implements visibility timeouts and message TTL
//! - Moves messages to a dead letter queue after max delivery count
//! - Assigns partitions by message key with stable hashing
//! - Provides thread-safe concurrent access
//!
//! This provider is intended for:
//! - Unit and integration testing of bus-runtime consumers
//! - Development and single-node deployments
//! - Reference implementation for cloud providers

use crate::client::BusProvider;
use crate::error::BusError;
use crate::message::{
    Message, MessageId, PartitionKey, ReceiptHandle, ReceivedMessage, Timestamp, TopicName,
};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all topics
struct BusStorage {
    topics: HashMap<TopicName, InMemoryTopic>,
    /// In-flight messages across all topics, keyed by receipt handle
    in_flight: HashMap<String, InFlightMessage>,
    config: InMemoryConfig,
}

impl BusStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            topics: HashMap::new(),
            in_flight: HashMap::new(),
            config,
        }
    }

    /// Get or create a topic
    fn get_or_create_topic(&mut self, topic: &TopicName) -> &mut InMemoryTopic {
        let partition_count = self.config.partition_count.max(1);
        self.topics
            .entry(topic.clone())
            .or_insert_with(|| InMemoryTopic::new(partition_count))
    }

    /// Return expired in-flight messages to their topic partitions
    fn reap_expired_locks(&mut self) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(handle, _)| handle.clone())
            .collect();

        for handle in expired {
            if let Some(entry) = self.in_flight.remove(&handle) {
                if let Some(state) = self.topics.get_mut(&entry.topic) {
                    state.requeue(entry.message);
                }
            }
        }
    }
}

/// Internal state for a single topic
struct InMemoryTopic {
    /// Per-partition FIFO queues
    partitions: Vec<VecDeque<StoredMessage>>,
    /// Dead letter queue for failed messages
    dead_letter: VecDeque<DeadLetteredMessage>,
    /// Next offset to assign
    next_offset: u64,
    /// Round-robin cursor for keyless messages
    next_partition: u32,
}

impl InMemoryTopic {
    fn new(partition_count: u32) -> Self {
        Self {
            partitions: (0..partition_count).map(|_| VecDeque::new()).collect(),
            dead_letter: VecDeque::new(),
            next_offset: 0,
            next_partition: 0,
        }
    }

    fn depth(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    /// Pick the partition for a message key, round-robin when keyless
    fn assign_partition(&mut self, key: Option<&PartitionKey>) -> u32 {
        let count = self.partitions.len() as u32;
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.as_str().hash(&mut hasher);
                (hasher.finish() % count as u64) as u32
            }
            None => {
                let partition = self.next_partition;
                self.next_partition = (self.next_partition + 1) % count;
                partition
            }
        }
    }

    /// Return a message to the front of its partition for redelivery
    fn requeue(&mut self, message: StoredMessage) {
        let partition = message.partition as usize;
        if let Some(queue) = self.partitions.get_mut(partition) {
            queue.push_front(message);
        }
    }
}

/// A message stored in a topic with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    attributes: HashMap<String, String>,
    partition_key: Option<PartitionKey>,
    correlation_id: Option<String>,
    partition: u32,
    offset: u64,
    delivery_count: u32,
    first_delivered_at: Option<Timestamp>,
    expires_at: Option<Timestamp>,
}

impl StoredMessage {
    fn from_message(
        message: &Message,
        message_id: MessageId,
        partition: u32,
        offset: u64,
        default_ttl: Option<Duration>,
    ) -> Self {
        let now = Timestamp::now();
        let ttl = message.time_to_live.or(default_ttl);
        let expires_at = ttl.map(|ttl| Timestamp::from_datetime(now.as_datetime() + ttl));

        Self {
            message_id,
            body: message.body.clone(),
            attributes: message.attributes.clone(),
            partition_key: message.partition_key.clone(),
            correlation_id: message.correlation_id.clone(),
            partition,
            offset,
            delivery_count: 0,
            first_delivered_at: None,
            expires_at,
        }
    }

    /// Check if message is expired based on TTL
    fn is_expired(&self) -> bool {
        if let Some(ref expires_at) = self.expires_at {
            Timestamp::now() >= *expires_at
        } else {
            false
        }
    }
}

/// A message currently being processed
struct InFlightMessage {
    topic: TopicName,
    message: StoredMessage,
    lock_expires_at: Timestamp,
}

impl InFlightMessage {
    fn is_expired(&self) -> bool {
        Timestamp::now() >= self.lock_expires_at
    }
}

/// A message that has been moved to a topic's dead letter queue
#[derive(Debug, Clone)]
pub struct DeadLetteredMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub delivery_count: u32,
    pub reason: String,
    pub dead_lettered_at: Timestamp,
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory bus provider implementation
pub struct InMemoryProvider {
    storage: Arc<RwLock<BusStorage>>,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(BusStorage::new(config))),
        }
    }

    /// Number of messages waiting in a topic (excluding in-flight and DLQ)
    pub fn topic_depth(&self, topic: &TopicName) -> usize {
        let storage = self.storage.read().expect("bus storage lock poisoned");
        storage.topics.get(topic).map(|t| t.depth()).unwrap_or(0)
    }

    /// Snapshot of a topic's dead letter queue
    pub fn dead_letter_messages(&self, topic: &TopicName) -> Vec<DeadLetteredMessage> {
        let storage = self.storage.read().expect("bus storage lock poisoned");
        storage
            .topics
            .get(topic)
            .map(|t| t.dead_letter.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Attempt to take one deliverable message from the topic
    ///
    /// Single pass under the write lock: reaps expired visibility locks,
    /// drops TTL-expired messages, auto-dead-letters over-delivered
    /// messages, and moves the delivered message into the in-flight map.
    fn try_receive(&self, topic: &TopicName) -> Result<Option<ReceivedMessage>, BusError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| BusError::ProviderError {
                provider: "in-memory".to_string(),
                message: "bus storage lock poisoned".to_string(),
            })?;

        storage.reap_expired_locks();

        let max_delivery_count = storage.config.max_delivery_count;
        let visibility_timeout = storage.config.visibility_timeout;

        // Pop the first deliverable message, dropping expired ones and
        // dead-lettering over-delivered ones along the way. Scoped so the
        // topic borrow ends before the in-flight map is touched.
        let taken: Option<StoredMessage> = {
            let state = match storage.topics.get_mut(topic) {
                Some(state) => state,
                None => return Ok(None),
            };

            let mut taken = None;
            'partitions: for i in 0..state.partitions.len() {
                while let Some(candidate) = state.partitions[i].pop_front() {
                    if candidate.is_expired() {
                        tracing::debug!(
                            message_id = %candidate.message_id,
                            topic = %topic,
                            "Dropping expired message"
                        );
                        continue;
                    }

                    if candidate.delivery_count >= max_delivery_count {
                        tracing::warn!(
                            message_id = %candidate.message_id,
                            topic = %topic,
                            delivery_count = candidate.delivery_count,
                            "Message exceeded max delivery count, moving to dead letter queue"
                        );
                        state.dead_letter.push_back(DeadLetteredMessage {
                            message_id: candidate.message_id,
                            body: candidate.body,
                            attributes: candidate.attributes,
                            delivery_count: candidate.delivery_count,
                            reason: "max delivery count exceeded".to_string(),
                            dead_lettered_at: Timestamp::now(),
                        });
                        continue;
                    }

                    taken = Some(candidate);
                    break 'partitions;
                }
            }
            taken
        };

        let mut message = match taken {
            Some(message) => message,
            None => return Ok(None),
        };

        message.delivery_count += 1;
        let now = Timestamp::now();
        if message.first_delivered_at.is_none() {
            message.first_delivered_at = Some(now.clone());
        }

        let handle = uuid::Uuid::new_v4().to_string();
        let lock_expires_at = Timestamp::from_datetime(now.as_datetime() + visibility_timeout);
        let receipt =
            ReceiptHandle::new(handle.clone(), lock_expires_at.clone(), ProviderType::InMemory);

        let received = ReceivedMessage {
            message_id: message.message_id.clone(),
            topic: topic.clone(),
            partition: message.partition,
            offset: message.offset,
            body: message.body.clone(),
            attributes: message.attributes.clone(),
            partition_key: message.partition_key.clone(),
            correlation_id: message.correlation_id.clone(),
            receipt,
            delivery_count: message.delivery_count,
            first_delivered_at: message
                .first_delivered_at
                .clone()
                .unwrap_or_else(Timestamp::now),
            delivered_at: now,
        };

        storage.in_flight.insert(
            handle,
            InFlightMessage {
                topic: topic.clone(),
                message,
                lock_expires_at,
            },
        );

        Ok(Some(received))
    }

    /// Remove an in-flight entry, failing when the receipt is unknown or stale
    fn take_in_flight(&self, receipt: &ReceiptHandle) -> Result<InFlightMessage, BusError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| BusError::ProviderError {
                provider: "in-memory".to_string(),
                message: "bus storage lock poisoned".to_string(),
            })?;

        storage
            .in_flight
            .remove(receipt.handle())
            .ok_or_else(|| BusError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            })
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl BusProvider for InMemoryProvider {
    async fn publish(&self, topic: &TopicName, message: &Message) -> Result<MessageId, BusError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| BusError::ProviderError {
                provider: "in-memory".to_string(),
                message: "bus storage lock poisoned".to_string(),
            })?;

        let max_topic_size = storage.config.max_topic_size;
        let default_ttl = storage.config.default_message_ttl;

        let state = storage.get_or_create_topic(topic);
        if state.depth() >= max_topic_size {
            return Err(BusError::TopicFull {
                topic: topic.to_string(),
                capacity: max_topic_size,
            });
        }

        let message_id = MessageId::new();
        let partition = state.assign_partition(message.partition_key.as_ref());
        let offset = state.next_offset;
        state.next_offset += 1;

        let stored =
            StoredMessage::from_message(message, message_id.clone(), partition, offset, default_ttl);
        state.partitions[partition as usize].push_back(stored);

        tracing::debug!(
            message_id = %message_id,
            topic = %topic,
            partition = partition,
            offset = offset,
            "Message published"
        );

        Ok(message_id)
    }

    async fn receive(
        &self,
        topic: &TopicName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, BusError> {
        let deadline = tokio::time::Instant::now()
            + timeout.to_std().unwrap_or(std::time::Duration::ZERO);

        loop {
            if let Some(message) = self.try_receive(topic)? {
                return Ok(Some(message));
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    async fn receive_batch(
        &self,
        topic: &TopicName,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, BusError> {
        let mut messages = Vec::new();

        // First message waits up to the full timeout, the rest are drained
        // without blocking.
        if let Some(first) = self.receive(topic, timeout).await? {
            messages.push(first);

            while messages.len() < max_messages as usize {
                match self.try_receive(topic)? {
                    Some(message) => messages.push(message),
                    None => break,
                }
            }
        }

        Ok(messages)
    }

    async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), BusError> {
        let entry = self.take_in_flight(receipt)?;

        tracing::debug!(
            message_id = %entry.message.message_id,
            topic = %entry.topic,
            "Message acknowledged"
        );

        Ok(())
    }

    async fn nack(&self, receipt: &ReceiptHandle) -> Result<(), BusError> {
        let entry = self.take_in_flight(receipt)?;
        let message_id = entry.message.message_id.clone();

        let mut storage = self
            .storage
            .write()
            .map_err(|_| BusError::ProviderError {
                provider: "in-memory".to_string(),
                message: "bus storage lock poisoned".to_string(),
            })?;

        if let Some(state) = storage.topics.get_mut(&entry.topic) {
            state.requeue(entry.message);
        }

        tracing::debug!(
            message_id = %message_id,
            "Message returned to topic for redelivery"
        );

        Ok(())
    }

    async fn dead_letter(&self, receipt: &ReceiptHandle, reason: &str) -> Result<(), BusError> {
        let entry = self.take_in_flight(receipt)?;
        let message_id = entry.message.message_id.clone();

        let mut storage = self
            .storage
            .write()
            .map_err(|_| BusError::ProviderError {
                provider: "in-memory".to_string(),
                message: "bus storage lock poisoned".to_string(),
            })?;

        if let Some(state) = storage.topics.get_mut(&entry.topic) {
            state.dead_letter.push_back(DeadLetteredMessage {
                message_id: entry.message.message_id,
                body: entry.message.body,
                attributes: entry.message.attributes,
                delivery_count: entry.message.delivery_count,
                reason: reason.to_string(),
                dead_lettered_at: Timestamp::now(),
            });
        }

        tracing::warn!(
            message_id = %message_id,
            reason = reason,
            "Message dead lettered"
        );

        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
