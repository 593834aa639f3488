use super::*;

// ============================================================================
// Test Helpers
// ============================================================================

/// Verifier that accepts when the x-test-signature header equals the secret
struct HeaderEqualsSecret;

impl SignatureVerifier for HeaderEqualsSecret {
    fn scheme(&self) -> &'static str {
        "header-equals-secret"
    }

    fn verify(
        &self,
        _payload: &[u8],
        headers: &WebhookHeaders,
        secret: &SecretValue,
    ) -> Result<(), VerifierError> {
        let value = headers
            .get("x-test-signature")
            .ok_or_else(|| VerifierError::MissingHeader {
                header: "x-test-signature".to_string(),
            })?;
        if constant_time_eq(value.as_bytes(), secret.expose().as_bytes()) {
            Ok(())
        } else {
            Err(VerifierError::SignatureMismatch)
        }
    }
}

fn provider(name: &str) -> ProviderName {
    ProviderName::new(name).unwrap()
}

// ============================================================================
// SecretValue Tests
// ============================================================================

#[test]
fn test_secret_debug_is_redacted() {
    let secret = SecretValue::new("whsec_super_secret");
    let debug = format!("{:?}", secret);
    assert!(!debug.contains("whsec_super_secret"));
    assert_eq!(debug, "SecretValue(***)");
}

#[test]
fn test_secret_expose_returns_material() {
    let secret = SecretValue::new("whsec_abc");
    assert_eq!(secret.expose(), "whsec_abc");
}

#[test]
fn test_constant_time_eq() {
    assert!(constant_time_eq(b"abc", b"abc"));
    assert!(!constant_time_eq(b"abc", b"abd"));
    assert!(!constant_time_eq(b"abc", b"abcd"));
}

// ============================================================================
// VerifierError Tests
// ============================================================================

#[test]
fn test_rejection_classification() {
    assert!(VerifierError::SignatureMismatch.is_rejection());
    assert!(VerifierError::MissingHeader {
        header: "x".to_string()
    }
    .is_rejection());
    assert!(VerifierError::StaleTimestamp {
        age_seconds: 960,
        tolerance_seconds: 900
    }
    .is_rejection());
    assert!(!VerifierError::Internal {
        message: "store down".to_string()
    }
    .is_rejection());
}

// ============================================================================
// VerifierRegistry Tests
// ============================================================================

#[test]
fn test_registered_provider_resolves_to_verify() {
    let mut registry = VerifierRegistry::new();
    registry.register(
        provider("stripe"),
        Arc::new(HeaderEqualsSecret),
        SecretValue::new("whsec_1"),
    );

    match registry.resolve(&provider("stripe")) {
        VerificationPolicy::Verify(verifier, secret) => {
            assert_eq!(verifier.scheme(), "header-equals-secret");
            assert_eq!(secret.expose(), "whsec_1");
        }
        _ => panic!("expected Verify policy"),
    }
}

#[test]
fn test_unregistered_provider_skips_by_default() {
    let registry = VerifierRegistry::new();
    assert!(matches!(
        registry.resolve(&provider("github")),
        VerificationPolicy::Skip
    ));
}

#[test]
fn test_unregistered_provider_is_missing_when_required() {
    let registry = VerifierRegistry::new().require_by_default();
    assert!(matches!(
        registry.resolve(&provider("github")),
        VerificationPolicy::Missing
    ));
}

#[test]
fn test_verify_round_trip_through_registry() {
    let mut registry = VerifierRegistry::new();
    registry.register(
        provider("stripe"),
        Arc::new(HeaderEqualsSecret),
        SecretValue::new("whsec_1"),
    );

    let mut headers = WebhookHeaders::new();
    headers.insert("X-Test-Signature", "whsec_1");

    match registry.resolve(&provider("stripe")) {
        VerificationPolicy::Verify(verifier, secret) => {
            assert!(verifier.verify(b"{}", &headers, secret).is_ok());

            let mut wrong = WebhookHeaders::new();
            wrong.insert("X-Test-Signature", "whsec_2");
            assert!(matches!(
                verifier.verify(b"{}", &wrong, secret),
                Err(VerifierError::SignatureMismatch)
            ));
        }
        _ => panic!("expected Verify policy"),
    }
}
