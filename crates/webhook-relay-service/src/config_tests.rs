use super::*;

// ============================================================================
// Default Tests
// ============================================================================

#[test]
fn test_default_config_is_valid() {
    let config = RelayConfig::default();
    assert!(config.validate().is_ok());
}

#[test]
fn test_defaults_match_domain_defaults() {
    let config = RelayConfig::default();

    let retry = config.retry.to_policy();
    assert_eq!(retry, RetryPolicy::default());

    let rate_limit = config.rate_limit.to_config();
    assert!(rate_limit.enabled);
    assert_eq!(rate_limit.requests_per_second, 50.0);

    let producer = config.producer.to_config();
    assert_eq!(producer.topic, "webhooks");
    assert_eq!(producer.message_ttl, None);

    let pipeline = config.consumer.to_pipeline_config();
    assert_eq!(pipeline.dedup_ttl, Duration::from_secs(7 * 24 * 60 * 60));
    assert!(pipeline.retry_on_timeout);
}

// ============================================================================
// Validation Tests
// ============================================================================

#[test]
fn test_empty_producer_topic_rejected() {
    let mut config = RelayConfig::default();
    config.producer.topic.clear();

    let err = config.validate().unwrap_err();
    assert!(err.contains("producer.topic"));
}

#[test]
fn test_sub_one_backoff_multiplier_rejected() {
    let mut config = RelayConfig::default();
    config.retry.backoff_multiplier = 0.5;

    assert!(config.validate().is_err());
}

#[test]
fn test_jitter_factor_out_of_range_rejected() {
    let mut config = RelayConfig::default();
    config.retry.jitter_factor = 1.5;

    assert!(config.validate().is_err());
}

#[test]
fn test_failure_rate_threshold_bounds() {
    let mut config = RelayConfig::default();
    config.circuit_breaker.failure_rate_threshold = 0.0;
    assert!(config.validate().is_err());

    config.circuit_breaker.failure_rate_threshold = 1.0;
    assert!(config.validate().is_ok());
}

#[test]
fn test_hmac_provider_without_secret_rejected() {
    let mut config = RelayConfig::default();
    config.verification.providers.push(ProviderVerification {
        name: "github".to_string(),
        scheme: VerificationScheme::HmacSha256,
        secret: None,
        header: None,
        tolerance_seconds: None,
    });

    let err = config.validate().unwrap_err();
    assert!(err.contains("github"));
}

#[test]
fn test_unverified_provider_needs_no_secret() {
    let mut config = RelayConfig::default();
    config.verification.providers.push(ProviderVerification {
        name: "internal".to_string(),
        scheme: VerificationScheme::None,
        secret: None,
        header: None,
        tolerance_seconds: None,
    });

    assert!(config.validate().is_ok());
}

#[test]
fn test_unknown_http_method_rejected() {
    let mut config = RelayConfig::default();
    config
        .producer
        .security
        .allowed_methods
        .push("FETCH".to_string());

    let err = config.validate().unwrap_err();
    assert!(err.contains("FETCH"));
}

#[test]
fn test_invalid_allowlist_address_rejected() {
    let mut config = RelayConfig::default();
    config
        .producer
        .security
        .ip_allowlist
        .insert("github".to_string(), vec!["not-an-ip".to_string()]);

    let err = config.validate().unwrap_err();
    assert!(err.contains("not-an-ip"));
    assert!(err.contains("github"));
}

#[test]
fn test_invalid_provider_pattern_rejected() {
    let mut config = RelayConfig::default();
    config.producer.security.provider_name_pattern = Some("[unclosed".to_string());

    let err = config.validate().unwrap_err();
    assert!(err.contains("provider_name_pattern"));
}

#[test]
fn test_retry_override_validated_like_global_policy() {
    let mut config = RelayConfig::default();
    config.retry_overrides.insert(
        "github".to_string(),
        RetrySettings {
            backoff_multiplier: 0.5,
            ..RetrySettings::default()
        },
    );

    let err = config.validate().unwrap_err();
    assert!(err.contains("retry_overrides.github"));
}

#[test]
fn test_disabled_rate_limit_ignores_rate() {
    let mut config = RelayConfig::default();
    config.rate_limit.enabled = false;
    config.rate_limit.requests_per_second = 0.0;

    assert!(config.validate().is_ok());
}

// ============================================================================
// Deserialization Tests
// ============================================================================

#[test]
fn test_partial_yaml_fills_defaults() {
    let yaml = r#"
producer:
  topic: events
retry:
  max_attempts: 2
"#;
    let config: RelayConfig = serde_yaml_from_str(yaml);

    assert_eq!(config.producer.topic, "events");
    assert_eq!(config.retry.max_attempts, 2);
    assert_eq!(config.retry.backoff_multiplier, 2.0);
    assert_eq!(config.consumer.topic, "webhooks");
}

#[test]
fn test_verification_scheme_names() {
    let yaml = r#"
verification:
  require_by_default: true
  providers:
    - name: github
      scheme: hmac-sha256
      secret: hush
    - name: stripe
      scheme: timestamped-hmac
      secret: hush
      tolerance_seconds: 300
"#;
    let config: RelayConfig = serde_yaml_from_str(yaml);

    assert!(config.verification.require_by_default);
    assert_eq!(config.verification.providers.len(), 2);
    assert_eq!(
        config.verification.providers[0].scheme,
        VerificationScheme::HmacSha256
    );
    assert_eq!(
        config.verification.providers[1].tolerance_seconds,
        Some(300)
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_security_and_override_sections_parse() {
    let yaml = r#"
producer:
  security:
    allowed_methods: [POST]
    allowed_content_types: [application/json]
    provider_name_pattern: "^(github|stripe)$"
    enable_ip_allowlist: true
    ip_allowlist:
      github: ["203.0.113.7"]
retry_overrides:
  github:
    max_attempts: 1
"#;
    let config: RelayConfig = serde_yaml_from_str(yaml);
    assert!(config.validate().is_ok());

    let security = config.producer.security.to_config();
    assert_eq!(security.allowed_methods, vec![HttpMethod::Post]);
    assert!(security.enable_ip_allowlist);
    assert_eq!(
        security.ip_allowlist["github"],
        vec!["203.0.113.7".parse::<std::net::IpAddr>().unwrap()]
    );
    assert!(security
        .provider_name_pattern
        .as_ref()
        .is_some_and(|p| p.is_match("stripe")));

    let resilience = config.resilience();
    assert_eq!(resilience.retry_overrides["github"].max_attempts, 1);
    assert_eq!(
        resilience.retry.max_attempts,
        RetryPolicy::default().max_attempts
    );
}

fn serde_yaml_from_str(yaml: &str) -> RelayConfig {
    config::Config::builder()
        .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap()
}
