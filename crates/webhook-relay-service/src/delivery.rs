//! # Log Delivery Processor
//!
//! Default processor registered for configured providers when no custom
//! processor is wired in. It records each delivered event with structured
//! fields and succeeds, which is enough to exercise the full ingest,
//! deduplicate, verify, and settle path end to end.

use async_trait::async_trait;
use tracing::info;
use webhook_relay_core::processor::{
    ProcessingContext, ProcessingResult, ProcessorError, WebhookProcessor,
};
use webhook_relay_core::ProviderName;

/// Processor that logs deliveries and acknowledges them
#[derive(Debug, Clone)]
pub struct LogDeliveryProcessor {
    provider: ProviderName,
}

impl LogDeliveryProcessor {
    pub fn new(provider: ProviderName) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl WebhookProcessor for LogDeliveryProcessor {
    fn provider_name(&self) -> ProviderName {
        self.provider.clone()
    }

    async fn process(
        &self,
        context: &ProcessingContext,
    ) -> Result<ProcessingResult, ProcessorError> {
        info!(
            event_id = %context.webhook.event_id,
            provider = %context.webhook.provider,
            topic = %context.topic,
            attempt = context.attempt_number,
            payload_bytes = context.webhook.payload.original_size(),
            "Delivered webhook event"
        );
        Ok(ProcessingResult::success())
    }
}

#[cfg(test)]
#[path = "delivery_tests.rs"]
mod tests;
