//! Response envelope codec.
//!
//! Every REST response and every push message is wrapped in the same shape:
//!
//! ```json
//! { "success": true,  "data": { ... }, "correlation_id": "c1", "timestamp": "2026-01-01T00:00:00Z" }
//! { "success": false, "error": { "code": "RATE_LIMITED", "message": "...", "retryable": true,
//!                                "retry_after_seconds": 5 }, "correlation_id": "c2", "timestamp": "..." }
//! ```
//!
//! [`decode`] never fails. A body that does not follow this shape comes
//! back as an [`ErrorEnvelope`] with code [`SCHEMA_VIOLATION`], because a
//! mismatched backend version is an operating condition and must not take
//! the caller down.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Machine code carried by envelopes that could not be decoded.
pub const SCHEMA_VIOLATION: &str = "SCHEMA_VIOLATION";

// ── Decoded types ────────────────────────────────────────────────────

/// A classified response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecodedEnvelope {
    Success(SuccessEnvelope),
    Error(ErrorEnvelope),
}

/// `success: true` envelope. The payload is opaque at this layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessEnvelope {
    pub payload: Value,
    /// `None` when the backend omitted the field.
    pub correlation_id: Option<String>,
    /// `None` when the backend omitted the field.
    pub timestamp: Option<DateTime<Utc>>,
}

/// `success: false` envelope, or a body that failed to decode.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub retry_after_seconds: Option<f64>,
    pub details: Option<String>,
    pub correlation_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ErrorEnvelope {
    /// Build the error returned for bodies that do not match the envelope shape.
    pub fn schema_violation(message: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            code: SCHEMA_VIOLATION.to_owned(),
            message: message.into(),
            retryable: false,
            retry_after_seconds: None,
            details: None,
            correlation_id,
            timestamp: None,
        }
    }

    pub fn is_schema_violation(&self) -> bool {
        self.code == SCHEMA_VIOLATION
    }

    /// Backend-suggested wait before retrying, if any.
    ///
    /// Negative or non-finite values are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_seconds
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

impl DecodedEnvelope {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Success(s) => s.correlation_id.as_deref(),
            Self::Error(e) => e.correlation_id.as_deref(),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Success(s) => s.timestamp,
            Self::Error(e) => e.timestamp,
        }
    }

    /// Split into the success payload or the typed error.
    pub fn into_result(self) -> Result<SuccessEnvelope, ErrorEnvelope> {
        match self {
            Self::Success(s) => Ok(s),
            Self::Error(e) => Err(e),
        }
    }
}

// ── Wire error object ────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
struct WireError {
    code: String,
    #[serde(default)]
    message: String,
    retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

// ── Decoding ─────────────────────────────────────────────────────────

/// Decode a raw response body.
pub fn decode(raw_body: &str) -> DecodedEnvelope {
    match serde_json::from_str::<Value>(raw_body) {
        Ok(value) => decode_value(value),
        Err(e) => violation(format!("body is not valid JSON: {e}"), None),
    }
}

/// Decode a raw body that may not be valid UTF-8.
pub fn decode_bytes(raw_body: &[u8]) -> DecodedEnvelope {
    match std::str::from_utf8(raw_body) {
        Ok(text) => decode(text),
        Err(e) => violation(format!("body is not valid UTF-8: {e}"), None),
    }
}

/// Decode an already-parsed JSON value.
pub fn decode_value(value: Value) -> DecodedEnvelope {
    let Value::Object(mut obj) = value else {
        return violation("envelope is not a JSON object", None);
    };

    let correlation_id = match obj.remove("correlation_id") {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id),
        Some(_) => return violation("correlation_id is not a string", None),
    };

    let timestamp = match obj.remove("timestamp") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => match parse_timestamp(&raw) {
            Ok(ts) => Some(ts),
            Err(e) => {
                return violation(format!("timestamp '{raw}' is not RFC3339: {e}"), correlation_id);
            }
        },
        Some(_) => return violation("timestamp is not a string", correlation_id),
    };

    match obj.remove("success") {
        Some(Value::Bool(true)) => match obj.remove("data") {
            Some(payload) => DecodedEnvelope::Success(SuccessEnvelope {
                payload,
                correlation_id,
                timestamp,
            }),
            None => violation("success envelope carries no data", correlation_id),
        },
        Some(Value::Bool(false)) => {
            let Some(raw_error) = obj.remove("error") else {
                return violation("error envelope carries no error object", correlation_id);
            };
            match serde_json::from_value::<WireError>(raw_error) {
                Ok(wire) if wire.code.trim().is_empty() => {
                    violation("error code is empty", correlation_id)
                }
                Ok(wire) => DecodedEnvelope::Error(ErrorEnvelope {
                    code: wire.code,
                    message: wire.message,
                    retryable: wire.retryable,
                    retry_after_seconds: wire.retry_after_seconds,
                    details: wire.details,
                    correlation_id,
                    timestamp,
                }),
                Err(e) => violation(format!("malformed error object: {e}"), correlation_id),
            }
        }
        Some(_) => violation("success discriminator is not a boolean", correlation_id),
        None => violation("missing success discriminator", correlation_id),
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn violation(message: impl Into<String>, correlation_id: Option<String>) -> DecodedEnvelope {
    let err = ErrorEnvelope::schema_violation(message, correlation_id);
    tracing::debug!(message = %err.message, "envelope schema violation");
    DecodedEnvelope::Error(err)
}

// ── Encoding ─────────────────────────────────────────────────────────

/// Encode an envelope back into its wire form.
pub fn encode(envelope: &DecodedEnvelope) -> String {
    to_value(envelope).to_string()
}

/// Encode an envelope into a JSON value.
pub fn to_value(envelope: &DecodedEnvelope) -> Value {
    let mut obj = Map::new();
    let (correlation_id, timestamp) = match envelope {
        DecodedEnvelope::Success(s) => {
            obj.insert("success".into(), Value::Bool(true));
            obj.insert("data".into(), s.payload.clone());
            (&s.correlation_id, &s.timestamp)
        }
        DecodedEnvelope::Error(e) => {
            let wire = WireError {
                code: e.code.clone(),
                message: e.message.clone(),
                retryable: e.retryable,
                retry_after_seconds: e.retry_after_seconds,
                details: e.details.clone(),
            };
            obj.insert("success".into(), Value::Bool(false));
            obj.insert(
                "error".into(),
                serde_json::to_value(wire).unwrap_or(Value::Null),
            );
            (&e.correlation_id, &e.timestamp)
        }
    };
    if let Some(id) = correlation_id {
        obj.insert("correlation_id".into(), Value::String(id.clone()));
    }
    if let Some(ts) = timestamp {
        obj.insert("timestamp".into(), Value::String(format_timestamp(ts)));
    }
    Value::Object(obj)
}

// ── Tests ────────────────────────────────────────────────────────────
