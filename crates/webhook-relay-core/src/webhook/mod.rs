//! # Webhook Capture Module
//!
//! Types describing one inbound webhook call, shared between the producer
//! pipeline (which builds and publishes them) and the consumer pipeline
//! (which rebuilds them from bus messages).

use crate::{EventId, ProviderName, Timestamp, ValidationError};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::IpAddr;
use std::str::FromStr;

/// Header carrying an explicit client-supplied idempotency token
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

// ============================================================================
// HTTP Method
// ============================================================================

/// HTTP method of the inbound webhook call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// Get canonical uppercase representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            _ => Err(ValidationError::InvalidFormat {
                field: "http_method".to_string(),
                message: format!("unknown method '{}'", s),
            }),
        }
    }
}

// ============================================================================
// Headers
// ============================================================================

/// Case-insensitive, order-preserving header multimap
///
/// Header names keep their original spelling for serialization but compare
/// case-insensitively on lookup, matching HTTP semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookHeaders {
    entries: Vec<(String, String)>,
}

impl WebhookHeaders {
    /// Create empty header map
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an iterator of name/value pairs, preserving order
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Append a header, keeping earlier values for the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Get first value for a header name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header name (case-insensitive), in insertion order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check whether a header is present
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate over all entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of header entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Webhook payload, either raw or gzip-compressed
///
/// Exactly one representation is authoritative at any time. A compressed
/// payload records the original size so consumers can account for the
/// uncompressed footprint without inflating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum Payload {
    Raw {
        #[serde(with = "bytes_serde")]
        body: Bytes,
    },
    Compressed {
        #[serde(with = "bytes_serde")]
        body: Bytes,
        original_size: usize,
    },
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl Payload {
    /// Create raw payload
    pub fn raw(body: impl Into<Bytes>) -> Self {
        Self::Raw { body: body.into() }
    }

    /// Check whether the payload is stored compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed { .. })
    }

    /// Size of the payload as stored (compressed size when compressed)
    pub fn stored_size(&self) -> usize {
        match self {
            Self::Raw { body } => body.len(),
            Self::Compressed { body, .. } => body.len(),
        }
    }

    /// Size of the uncompressed payload
    pub fn original_size(&self) -> usize {
        match self {
            Self::Raw { body } => body.len(),
            Self::Compressed { original_size, .. } => *original_size,
        }
    }

    /// Get the raw payload bytes, inflating when necessary
    ///
    /// Decompression failure is surfaced, never swallowed; the consumer
    /// classifies it as a processor-visible error.
    pub fn bytes(&self) -> Result<Bytes, PayloadError> {
        match self {
            Self::Raw { body } => Ok(body.clone()),
            Self::Compressed { body, .. } => {
                let mut decoder = GzDecoder::new(body.as_ref());
                let mut inflated = Vec::new();
                decoder
                    .read_to_end(&mut inflated)
                    .map_err(|e| PayloadError::Decompression {
                        message: e.to_string(),
                    })?;
                Ok(Bytes::from(inflated))
            }
        }
    }

    /// Compress the payload with gzip when it meets the size threshold
    ///
    /// Already-compressed payloads and payloads below the threshold are
    /// returned unchanged.
    pub fn compress_if_larger(self, threshold: usize) -> Result<Self, PayloadError> {
        match self {
            Self::Raw { body } if body.len() >= threshold => {
                let original_size = body.len();
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(&body)
                    .and_then(|_| encoder.finish())
                    .map(|deflated| Self::Compressed {
                        body: Bytes::from(deflated),
                        original_size,
                    })
                    .map_err(|e| PayloadError::Compression {
                        message: e.to_string(),
                    })
            }
            other => Ok(other),
        }
    }
}

/// Errors from payload compression handling
#[derive(Debug, Clone, thiserror::Error)]
pub enum PayloadError {
    #[error("Payload decompression failed: {message}")]
    Decompression { message: String },

    #[error("Payload compression failed: {message}")]
    Compression { message: String },
}

// ============================================================================
// ReceivedWebhook
// ============================================================================

/// Immutable record of one inbound webhook call
///
/// Created at ingestion, never mutated afterwards. Lives until the bus
/// message expires or the consumer acknowledges it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedWebhook {
    pub event_id: EventId,
    pub provider: ProviderName,
    pub payload: Payload,
    pub headers: WebhookHeaders,
    pub query_params: HashMap<String, String>,
    pub received_at: Timestamp,
    pub source_ip: Option<IpAddr>,
    pub http_method: HttpMethod,
}

impl ReceivedWebhook {
    /// Create new webhook record, generating an event ID when absent
    pub fn new(
        event_id: Option<EventId>,
        provider: ProviderName,
        payload: Payload,
        headers: WebhookHeaders,
        http_method: HttpMethod,
    ) -> Self {
        Self {
            event_id: event_id.unwrap_or_default(),
            provider,
            payload,
            headers,
            query_params: HashMap::new(),
            received_at: Timestamp::now(),
            source_ip: None,
            http_method,
        }
    }

    /// Set query parameters
    pub fn with_query_params(mut self, params: HashMap<String, String>) -> Self {
        self.query_params = params;
        self
    }

    /// Set source IP address
    pub fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    /// Get first value for a header name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Get the raw payload bytes, inflating compressed payloads
    pub fn payload_bytes(&self) -> Result<Bytes, PayloadError> {
        self.payload.bytes()
    }

    /// Deduplication key for exactly-once processing
    ///
    /// An explicit `X-Idempotency-Key` header wins over the derived
    /// `{provider}:{event_id}` key.
    pub fn dedup_key(&self) -> String {
        match self.headers.get(IDEMPOTENCY_HEADER) {
            Some(token) => token.to_string(),
            None => format!("{}:{}", self.provider, self.event_id),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
