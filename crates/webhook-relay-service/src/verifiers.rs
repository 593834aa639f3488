//! Production [`SignatureVerifier`] implementations for the service binary.
//!
//! Concrete signature schemes constructed from configuration at startup and
//! registered per provider. Two HMAC-SHA256 layouts are supported:
//!
//! | Type | Wire format | Used by |
//! |------|-------------|---------|
//! | [`HmacSha256Verifier`] | `sha256=<hex-digest>` in one header | GitHub-style providers |
//! | [`TimestampedHmacVerifier`] | `t=<unix>,v1=<hex>` in one header | Stripe-style providers |
//!
//! [`NoopVerifier`] accepts everything and exists for development only.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;
use webhook_relay_core::verifier::{constant_time_eq, SecretValue, SignatureVerifier, VerifierError};
use webhook_relay_core::webhook::WebhookHeaders;
use webhook_relay_core::Timestamp;

type HmacSha256 = Hmac<Sha256>;

fn hmac_digest(secret: &SecretValue, data: &[u8]) -> Result<Vec<u8>, VerifierError> {
    let mut mac = HmacSha256::new_from_slice(secret.expose().as_bytes()).map_err(|e| {
        VerifierError::Internal {
            message: format!("invalid HMAC key: {}", e),
        }
    })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn decode_hex_digest(hex_digest: &str) -> Result<Vec<u8>, VerifierError> {
    hex::decode(hex_digest).map_err(|_| VerifierError::MalformedSignature {
        message: "signature digest is not valid hex".to_string(),
    })
}

// ============================================================================
// HmacSha256Verifier
// ============================================================================

/// HMAC-SHA256 over the raw payload, GitHub wire format.
///
/// Expects the configured header to carry `sha256=<hex-digest>` where the
/// digest is HMAC-SHA256 of the payload bytes under the shared secret.
#[derive(Debug, Clone)]
pub struct HmacSha256Verifier {
    header: String,
}

impl HmacSha256Verifier {
    /// Default signature header, as used by GitHub
    pub const DEFAULT_HEADER: &'static str = "x-hub-signature-256";

    const PREFIX: &'static str = "sha256=";

    /// Create verifier reading the default header
    pub fn new() -> Self {
        Self::with_header(Self::DEFAULT_HEADER)
    }

    /// Create verifier reading a custom header
    pub fn with_header(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl Default for HmacSha256Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier for HmacSha256Verifier {
    fn scheme(&self) -> &'static str {
        "hmac-sha256"
    }

    fn verify(
        &self,
        payload: &[u8],
        headers: &WebhookHeaders,
        secret: &SecretValue,
    ) -> Result<(), VerifierError> {
        let value = headers
            .get(&self.header)
            .ok_or_else(|| VerifierError::MissingHeader {
                header: self.header.clone(),
            })?;

        let hex_digest =
            value
                .strip_prefix(Self::PREFIX)
                .ok_or_else(|| VerifierError::MalformedSignature {
                    message: format!("expected '{}' prefix", Self::PREFIX),
                })?;

        let provided = decode_hex_digest(hex_digest)?;
        let expected = hmac_digest(secret, payload)?;

        if constant_time_eq(&provided, &expected) {
            Ok(())
        } else {
            Err(VerifierError::SignatureMismatch)
        }
    }
}

// ============================================================================
// TimestampedHmacVerifier
// ============================================================================

/// Timestamped HMAC-SHA256, Stripe wire format.
///
/// Expects the configured header to carry `t=<unix-seconds>,v1=<hex-digest>`
/// where the digest is HMAC-SHA256 of `"{t}.{payload}"`. Binding the
/// timestamp into the signed material and bounding its age defeats replay
/// of captured deliveries.
#[derive(Debug, Clone)]
pub struct TimestampedHmacVerifier {
    header: String,
    tolerance: std::time::Duration,
}

impl TimestampedHmacVerifier {
    /// Default signature header, as used by Stripe
    pub const DEFAULT_HEADER: &'static str = "stripe-signature";

    /// Default replay tolerance
    pub const DEFAULT_TOLERANCE: std::time::Duration = std::time::Duration::from_secs(15 * 60);

    /// Create verifier with the default header and tolerance
    pub fn new() -> Self {
        Self {
            header: Self::DEFAULT_HEADER.to_string(),
            tolerance: Self::DEFAULT_TOLERANCE,
        }
    }

    /// Create verifier with a custom header and tolerance
    pub fn with_header_and_tolerance(
        header: impl Into<String>,
        tolerance: std::time::Duration,
    ) -> Self {
        Self {
            header: header.into(),
            tolerance,
        }
    }

    /// Compute the hex digest a sender would attach for this payload
    ///
    /// Exposed so tests and local tooling can construct valid signatures.
    pub fn sign(
        secret: &SecretValue,
        timestamp_seconds: i64,
        payload: &[u8],
    ) -> Result<String, VerifierError> {
        let mut signed = format!("{}.", timestamp_seconds).into_bytes();
        signed.extend_from_slice(payload);
        Ok(hex::encode(hmac_digest(secret, &signed)?))
    }

    fn parse_header(value: &str) -> Result<(i64, Vec<&str>), VerifierError> {
        let mut timestamp = None;
        let mut digests = Vec::new();

        for element in value.split(',') {
            let (key, val) =
                element
                    .split_once('=')
                    .ok_or_else(|| VerifierError::MalformedSignature {
                        message: "expected comma-separated key=value pairs".to_string(),
                    })?;
            match key.trim() {
                "t" => {
                    let parsed =
                        val.trim()
                            .parse::<i64>()
                            .map_err(|_| VerifierError::MalformedSignature {
                                message: "timestamp is not an integer".to_string(),
                            })?;
                    timestamp = Some(parsed);
                }
                "v1" => digests.push(val.trim()),
                // Unknown keys are ignored for forward compatibility
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| VerifierError::MalformedSignature {
            message: "missing 't' element".to_string(),
        })?;
        if digests.is_empty() {
            return Err(VerifierError::MalformedSignature {
                message: "missing 'v1' element".to_string(),
            });
        }
        Ok((timestamp, digests))
    }
}

impl Default for TimestampedHmacVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier for TimestampedHmacVerifier {
    fn scheme(&self) -> &'static str {
        "timestamped-hmac-sha256"
    }

    fn verify(
        &self,
        payload: &[u8],
        headers: &WebhookHeaders,
        secret: &SecretValue,
    ) -> Result<(), VerifierError> {
        let value = headers
            .get(&self.header)
            .ok_or_else(|| VerifierError::MissingHeader {
                header: self.header.clone(),
            })?;

        let (timestamp, digests) = Self::parse_header(value)?;

        // Clock skew in either direction counts against the tolerance
        let age_seconds = (Timestamp::now().unix_seconds() - timestamp).abs();
        let tolerance_seconds = self.tolerance.as_secs() as i64;
        if age_seconds > tolerance_seconds {
            return Err(VerifierError::StaleTimestamp {
                age_seconds,
                tolerance_seconds,
            });
        }

        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(payload);
        let expected = hmac_digest(secret, &signed)?;

        // Multiple v1 digests appear during secret rotation; any match passes
        for digest in digests {
            let provided = decode_hex_digest(digest)?;
            if constant_time_eq(&provided, &expected) {
                return Ok(());
            }
        }
        Err(VerifierError::SignatureMismatch)
    }
}

// ============================================================================
// NoopVerifier
// ============================================================================

/// Verifier that accepts every payload.
///
/// **Development and testing only.** Emits a WARN at construction so an
/// unverified provider never slips into production silently.
#[derive(Debug, Clone)]
pub struct NoopVerifier;

impl NoopVerifier {
    pub fn new() -> Self {
        warn!(
            "NoopVerifier is active - webhook signatures will not be checked. \
             Configure a real verifier before deploying."
        );
        Self
    }
}

impl Default for NoopVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier for NoopVerifier {
    fn scheme(&self) -> &'static str {
        "noop"
    }

    fn verify(
        &self,
        _payload: &[u8],
        _headers: &WebhookHeaders,
        _secret: &SecretValue,
    ) -> Result<(), VerifierError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "verifiers_tests.rs"]
mod tests;
