//! # Consumer Loop
//!
//! Long-running poll loop that pulls event envelopes off the bus, runs them
//! through the core consumer pipeline, and settles each message according
//! to the pipeline's disposition.

use bus_runtime::{BusClient, BusError, ReceivedMessage, TopicName};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use webhook_relay_core::consumer::{ConsumerPipeline, Disposition};
use webhook_relay_core::processor::ProcessingContext;
use webhook_relay_core::webhook::ReceivedWebhook;
use webhook_relay_core::CorrelationId;

// ============================================================================
// Configuration
// ============================================================================

/// Consumer loop tuning
#[derive(Debug, Clone)]
pub struct ConsumerLoopConfig {
    /// Topic the loop consumes from
    pub topic: String,

    /// How long one receive call waits for a message
    pub poll_timeout: Duration,

    /// Pause after a receive error before polling again
    pub error_backoff: Duration,
}

impl Default for ConsumerLoopConfig {
    fn default() -> Self {
        Self {
            topic: "webhooks".to_string(),
            poll_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// Consumer Loop
// ============================================================================

/// Bridges the bus to the consumer pipeline
pub struct ConsumerLoop {
    client: BusClient,
    pipeline: Arc<ConsumerPipeline>,
    topic: TopicName,
    config: ConsumerLoopConfig,
}

impl ConsumerLoop {
    /// Create loop over the given client and pipeline
    pub fn new(
        client: BusClient,
        pipeline: Arc<ConsumerPipeline>,
        config: ConsumerLoopConfig,
    ) -> Result<Self, bus_runtime::ValidationError> {
        let topic = TopicName::new(config.topic.clone())?;
        Ok(Self {
            client,
            pipeline,
            topic,
            config,
        })
    }

    /// Run until the shutdown signal flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.topic, "Consumer loop started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(topic = %self.topic, "Consumer loop shutting down");
                        return;
                    }
                }
                result = self.poll_once() => {
                    if let Err(e) = result {
                        warn!(topic = %self.topic, error = %e, "Receive failed, backing off");
                        tokio::time::sleep(self.config.error_backoff).await;
                    }
                }
            }
        }
    }

    /// Receive and settle at most one message
    ///
    /// Returns whether a message was handled. Exposed separately from `run`
    /// so tests can drive the loop deterministically.
    pub async fn poll_once(&self) -> Result<bool, BusError> {
        let timeout = chrono::Duration::from_std(self.config.poll_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(1));
        let Some(received) = self.client.receive(&self.topic, timeout).await? else {
            return Ok(false);
        };

        let disposition = self.dispose(&received).await;
        self.settle(&received, disposition).await;
        Ok(true)
    }

    async fn dispose(&self, received: &ReceivedMessage) -> Disposition {
        // An envelope that does not decode can never process; route it to
        // the dead-letter queue with the decode error attached.
        let webhook: ReceivedWebhook = match serde_json::from_slice(&received.body) {
            Ok(webhook) => webhook,
            Err(e) => {
                error!(
                    message_id = %received.message_id.as_str(),
                    error = %e,
                    "Undecodable event envelope"
                );
                return Disposition::DeadLetter {
                    reason: format!("undecodable event envelope: {}", e),
                };
            }
        };

        let mut context = ProcessingContext::new(webhook, self.topic.as_str())
            .with_position(received.partition, received.offset)
            .with_attempt_number(received.delivery_count);
        if let Some(correlation) = received
            .correlation_id
            .as_deref()
            .and_then(|c| c.parse::<CorrelationId>().ok())
        {
            context = context.with_correlation_id(correlation);
        }

        self.pipeline.handle(context).await
    }

    async fn settle(&self, received: &ReceivedMessage, disposition: Disposition) {
        let result = match &disposition {
            Disposition::Ack => self.client.ack(&received.receipt).await,
            Disposition::Retry { delay: Some(delay) } => {
                // Settling must not stall the poll loop. The message stays
                // invisible under its visibility timeout while a spawned
                // task waits out the delay before returning it.
                let client = self.client.clone();
                let receipt = received.receipt.clone();
                let message_id = received.message_id.clone();
                let delay = *delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = client.nack(&receipt).await {
                        // The visibility timeout redelivers on its own
                        warn!(
                            message_id = %message_id.as_str(),
                            error = %e,
                            "Failed to return message after retry delay"
                        );
                    }
                });
                Ok(())
            }
            Disposition::Retry { delay: None } => self.client.nack(&received.receipt).await,
            Disposition::DeadLetter { reason } => {
                self.client.dead_letter(&received.receipt, reason).await
            }
        };

        match result {
            Ok(()) => debug!(
                message_id = %received.message_id.as_str(),
                disposition = ?disposition,
                "Message settled"
            ),
            // The visibility timeout will redeliver; the dedup claim keeps
            // a re-settled ack from processing twice.
            Err(e) => warn!(
                message_id = %received.message_id.as_str(),
                error = %e,
                "Failed to settle message"
            ),
        }
    }
}

#[cfg(test)]
#[path = "consumer_loop_tests.rs"]
mod tests;
