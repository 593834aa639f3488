//! # Signature Verification Contract
//!
//! Trait and registry for provider signature schemes. Scheme implementations
//! live with the service wiring; the core only fixes the contract the
//! consumer pipeline enforces.

use crate::webhook::WebhookHeaders;
use crate::ProviderName;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ============================================================================
// Secret Handling
// ============================================================================

/// Shared secret for signature verification
///
/// Zeroed on drop and redacted from Debug output so secrets never leak
/// through logs or panics.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wrap a secret string
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Expose the secret material
    ///
    /// Callers must not log or persist the returned slice.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretValue(***)")
    }
}

impl From<String> for SecretValue {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

/// Constant-time byte comparison for signature digests
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

// ============================================================================
// Errors
// ============================================================================

/// Verification failure raised by a signature scheme
#[derive(Debug, Clone, thiserror::Error)]
pub enum VerifierError {
    #[error("Required signature header '{header}' is missing")]
    MissingHeader { header: String },

    #[error("Malformed signature: {message}")]
    MalformedSignature { message: String },

    #[error("Signature does not match payload")]
    SignatureMismatch,

    #[error("Signature timestamp is {age_seconds}s old, tolerance is {tolerance_seconds}s")]
    StaleTimestamp {
        age_seconds: i64,
        tolerance_seconds: i64,
    },

    #[error("Verifier internal error: {message}")]
    Internal { message: String },
}

impl VerifierError {
    /// Whether the failure condemns the event rather than the infrastructure
    ///
    /// Everything except `Internal` is evidence against the event itself and
    /// never improves on redelivery.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }
}

// ============================================================================
// Verifier Trait
// ============================================================================

/// One signature scheme
///
/// Implementations must compare digests in constant time and must not log
/// secret material or raw signatures.
pub trait SignatureVerifier: Send + Sync {
    /// Scheme identifier for logs and configuration
    fn scheme(&self) -> &'static str;

    /// Verify a payload against its headers using the shared secret
    fn verify(
        &self,
        payload: &[u8],
        headers: &WebhookHeaders,
        secret: &SecretValue,
    ) -> Result<(), VerifierError>;
}

// ============================================================================
// Verifier Registry
// ============================================================================

struct VerifierEntry {
    verifier: Arc<dyn SignatureVerifier>,
    secret: SecretValue,
}

/// How the pipeline should treat a given provider's signatures
pub enum VerificationPolicy<'a> {
    /// Verify with this scheme and secret
    Verify(&'a dyn SignatureVerifier, &'a SecretValue),
    /// No verifier configured and none required
    Skip,
    /// Verification required but no verifier configured
    Missing,
}

/// Registry mapping providers to their signature scheme and secret
#[derive(Default)]
pub struct VerifierRegistry {
    entries: HashMap<String, VerifierEntry>,
    require_by_default: bool,
}

impl VerifierRegistry {
    /// Create registry that skips providers without a configured verifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a configured verifier for every provider
    ///
    /// With this set, an event from an unconfigured provider is rejected
    /// instead of passed through unverified.
    pub fn require_by_default(mut self) -> Self {
        self.require_by_default = true;
        self
    }

    /// Register a scheme and secret for a provider
    pub fn register(
        &mut self,
        provider: ProviderName,
        verifier: Arc<dyn SignatureVerifier>,
        secret: SecretValue,
    ) {
        self.entries
            .insert(provider.as_str().to_string(), VerifierEntry { verifier, secret });
    }

    /// Resolve the verification policy for a provider
    pub fn resolve(&self, provider: &ProviderName) -> VerificationPolicy<'_> {
        match self.entries.get(provider.as_str()) {
            Some(entry) => VerificationPolicy::Verify(entry.verifier.as_ref(), &entry.secret),
            None if self.require_by_default => VerificationPolicy::Missing,
            None => VerificationPolicy::Skip,
        }
    }

    /// Providers with a configured verifier
    pub fn providers(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for VerifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierRegistry")
            .field("providers", &self.providers())
            .field("require_by_default", &self.require_by_default)
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
