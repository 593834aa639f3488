use super::*;

// ============================================================================
// EventId Tests
// ============================================================================

#[test]
fn test_event_id_uniqueness() {
    let a = EventId::new();
    let b = EventId::new();
    assert_ne!(a, b);
}

#[test]
fn test_event_id_round_trip() {
    let id = EventId::new();
    let parsed: EventId = id.as_str().parse().unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn test_event_id_rejects_garbage() {
    let result: Result<EventId, _> = "not-a-ulid!".parse();
    assert!(result.is_err());
}

// ============================================================================
// ProviderName Tests
// ============================================================================

#[test]
fn test_provider_name_normalizes_case() {
    let provider = ProviderName::new("Stripe").unwrap();
    assert_eq!(provider.as_str(), "stripe");
}

#[test]
fn test_provider_name_accepts_valid_characters() {
    assert!(ProviderName::new("github-enterprise").is_ok());
    assert!(ProviderName::new("my_provider2").is_ok());
}

#[test]
fn test_provider_name_rejects_empty() {
    assert!(matches!(
        ProviderName::new(""),
        Err(ValidationError::Required { .. })
    ));
}

#[test]
fn test_provider_name_rejects_too_long() {
    let long = "a".repeat(65);
    assert!(matches!(
        ProviderName::new(long),
        Err(ValidationError::TooLong { .. })
    ));
}

#[test]
fn test_provider_name_rejects_invalid_characters() {
    assert!(ProviderName::new("has space").is_err());
    assert!(ProviderName::new("dots.not.allowed").is_err());
}

#[test]
fn test_provider_name_rejects_edge_hyphens() {
    assert!(ProviderName::new("-leading").is_err());
    assert!(ProviderName::new("trailing-").is_err());
}

// ============================================================================
// Timestamp Tests
// ============================================================================

#[test]
fn test_timestamp_rfc3339_round_trip() {
    let ts = Timestamp::now();
    let parsed = Timestamp::from_rfc3339(&ts.to_rfc3339()).unwrap();
    assert_eq!(parsed, ts);
}

#[test]
fn test_timestamp_arithmetic() {
    let ts = Timestamp::now();
    let later = ts.add_duration(Duration::from_secs(60));
    assert!(later > ts);
    assert_eq!(later.duration_since(ts), Duration::from_secs(60));
    assert_eq!(later.subtract_duration(Duration::from_secs(60)), ts);
}

#[test]
fn test_duration_since_saturates_at_zero() {
    let earlier = Timestamp::now();
    let later = earlier.add_duration(Duration::from_secs(10));
    assert_eq!(earlier.duration_since(later), Duration::ZERO);
}

// ============================================================================
// Error Classification Tests
// ============================================================================

#[test]
fn test_transient_errors() {
    let err = RelayError::ExternalService {
        service: "bus".to_string(),
        message: "timeout".to_string(),
    };
    assert!(err.is_transient());
    assert_eq!(err.error_category(), ErrorCategory::Transient);
}

#[test]
fn test_permanent_errors() {
    let err = RelayError::Validation(ValidationError::Required {
        field: "provider".to_string(),
    });
    assert!(!err.is_transient());
    assert_eq!(err.error_category(), ErrorCategory::Permanent);
}

#[test]
fn test_configuration_errors_are_not_retried() {
    let err = RelayError::Configuration {
        message: "missing secret".to_string(),
    };
    assert!(!err.is_transient());
    assert_eq!(err.error_category(), ErrorCategory::Configuration);
}
