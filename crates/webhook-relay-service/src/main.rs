//! # Webhook Relay Service
//!
//! Binary entry point for the webhook relay.
//!
//! This executable:
//! - Loads configuration from files and environment
//! - Initializes structured logging
//! - Wires the event bus, signature verifiers, and consumer pipeline
//! - Runs the consumer loop until shutdown

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webhook_relay_core::consumer::ConsumerPipeline;
use webhook_relay_core::processor::ProcessorRegistry;
use webhook_relay_core::verifier::{SecretValue, SignatureVerifier, VerifierRegistry};
use webhook_relay_core::ProviderName;

use bus_runtime::{BusClient, InMemoryConfig, InMemoryProvider};
use webhook_relay_core::idempotency::InMemoryIdempotencyStore;
use webhook_relay_service::config::{ProviderVerification, RelayConfig, VerificationScheme};
use webhook_relay_service::{
    ConsumerLoop, HmacSha256Verifier, LogDeliveryProcessor, NoopVerifier, RateLimiter,
    ResiliencePolicy, TimestampedHmacVerifier, WebhookProducer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // Load configuration
    //
    // Sources (applied in order, later sources override earlier ones):
    //  1. /etc/webhook-relay/service.yaml  - system-wide defaults
    //  2. ./config/service.yaml            - deployment-local override
    //  3. Path given by WR_CONFIG_FILE env - operator-specified file
    //  4. Environment variables prefixed WR__ (double-underscore separator)
    //     e.g. WR__PRODUCER__TOPIC=events sets producer.topic = events
    //
    // Every field carries a serde default, so absent files or an entirely
    // unconfigured environment produces a working in-memory setup. A
    // malformed file or an environment variable that cannot be coerced to
    // the correct type IS a hard error because it indicates
    // deliberate-but-broken operator configuration.
    // -------------------------------------------------------------------------
    let config = match RelayConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(3);
        }
    };

    init_logging(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    info!("Starting Webhook Relay Service");

    // -------------------------------------------------------------------------
    // Event bus
    // -------------------------------------------------------------------------
    let provider = Arc::new(InMemoryProvider::new(InMemoryConfig::default()));
    let client = BusClient::new(provider);

    // -------------------------------------------------------------------------
    // Signature verifiers and processors
    //
    // Every configured provider gets a verifier matching its scheme and a
    // log-delivery processor. Providers with invalid names are skipped
    // with an error rather than aborting the whole service.
    // -------------------------------------------------------------------------
    let mut verifiers = VerifierRegistry::new();
    if config.verification.require_by_default {
        verifiers = verifiers.require_by_default();
    }
    let mut processors = ProcessorRegistry::new();

    for entry in &config.verification.providers {
        let provider_name = match ProviderName::new(&entry.name) {
            Ok(name) => name,
            Err(e) => {
                error!(
                    provider = %entry.name,
                    error = %e,
                    "Skipping provider with invalid name in configuration"
                );
                continue;
            }
        };

        let secret = SecretValue::new(entry.secret.clone().unwrap_or_default());
        verifiers.register(provider_name.clone(), build_verifier(entry), secret);
        processors.register(Arc::new(LogDeliveryProcessor::new(provider_name.clone())));
        info!(provider = %provider_name, scheme = ?entry.scheme, "Registered provider");
    }

    if processors.is_empty() {
        warn!(
            "No providers configured - incoming events will be acknowledged \
             without processing. Add entries under verification.providers."
        );
    }

    // -------------------------------------------------------------------------
    // Producer and consumer pipelines
    //
    // The HTTP layer that feeds the producer lives outside this binary; the
    // producer is held here so an embedding ingestion front end can submit
    // through it with size, rate, and breaker limits applied from startup.
    // -------------------------------------------------------------------------
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.to_config()));
    let resilience = Arc::new(ResiliencePolicy::new(config.resilience()));
    let _producer = WebhookProducer::new(
        client.clone(),
        config.producer.to_config(),
        rate_limiter,
        resilience,
    )?;
    info!(
        topic = %config.producer.topic,
        "Producer ready to accept webhook submissions"
    );

    let pipeline = Arc::new(ConsumerPipeline::new(
        Arc::new(InMemoryIdempotencyStore::new()),
        Arc::new(verifiers),
        Arc::new(processors),
        config.consumer.to_pipeline_config(),
    ));
    let consumer = ConsumerLoop::new(client, pipeline, config.consumer.to_loop_config())?;

    // -------------------------------------------------------------------------
    // Run until interrupted
    // -------------------------------------------------------------------------
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let consumer_task = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining consumer");
    shutdown_tx.send(true)?;
    consumer_task.await?;

    info!("Webhook Relay Service stopped");
    Ok(())
}

fn init_logging(config: &RelayConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Build the verifier matching a provider's configured scheme
fn build_verifier(entry: &ProviderVerification) -> Arc<dyn SignatureVerifier> {
    match entry.scheme {
        VerificationScheme::HmacSha256 => match &entry.header {
            Some(header) => Arc::new(HmacSha256Verifier::with_header(header.clone())),
            None => Arc::new(HmacSha256Verifier::new()),
        },
        VerificationScheme::TimestampedHmac => {
            let header = entry
                .header
                .clone()
                .unwrap_or_else(|| TimestampedHmacVerifier::DEFAULT_HEADER.to_string());
            let tolerance = entry
                .tolerance_seconds
                .map(std::time::Duration::from_secs)
                .unwrap_or(TimestampedHmacVerifier::DEFAULT_TOLERANCE);
            Arc::new(TimestampedHmacVerifier::with_header_and_tolerance(
                header, tolerance,
            ))
        }
        VerificationScheme::None => Arc::new(NoopVerifier::new()),
    }
}
