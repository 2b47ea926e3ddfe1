//! Typed stream events carried inside success envelopes on push transports.
//!
//! Wire shape of the envelope `data`:
//!
//! ```json
//! { "kind": "child.changed", "version": 1, "resource_id": "sess-1",
//!   "timestamp": "2026-01-01T00:00:05Z", "body": { "key": "dev-4", "data": { ... } } }
//! ```
//!
//! Known kinds map to closed variants of [`EventKind`]. Anything else is
//! kept as [`EventKind::Unknown`] so consumers decide explicitly what to do
//! with kinds introduced by newer backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::{self, DecodedEnvelope, ErrorEnvelope, SuccessEnvelope};

pub const KIND_SNAPSHOT: &str = "snapshot";
pub const KIND_RESOURCE_CHANGED: &str = "resource.changed";
pub const KIND_CHILD_CHANGED: &str = "child.changed";
pub const KIND_HEARTBEAT: &str = "heartbeat";

/// A decoded push event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEvent {
    pub kind: EventKind,
    /// Event schema version; `1` when the backend omits it.
    pub version: u32,
    /// Resource the event belongs to, if the backend says.
    pub resource_id: Option<String>,
    /// Event time. Falls back to the envelope timestamp when the event has none.
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

/// Kind-specific event body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Full resource payload, same shape as a REST snapshot.
    Snapshot { payload: Value },
    /// Named top-level fields changed.
    ResourceChanged { fields: Map<String, Value> },
    /// One child entity changed.
    ChildChanged { key: String, data: Value },
    /// Server liveness signal; carries no data.
    Heartbeat,
    /// A kind this client does not know.
    Unknown { kind: String, body: Value },
}

impl EventKind {
    /// Wire name of the kind.
    pub fn name(&self) -> &str {
        match self {
            Self::Snapshot { .. } => KIND_SNAPSHOT,
            Self::ResourceChanged { .. } => KIND_RESOURCE_CHANGED,
            Self::ChildChanged { .. } => KIND_CHILD_CHANGED,
            Self::Heartbeat => KIND_HEARTBEAT,
            Self::Unknown { kind, .. } => kind,
        }
    }
}

/// Result of decoding one push frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Event(StreamEvent),
    /// Well-formed business error pushed by the backend.
    Rejected(ErrorEnvelope),
    /// Frame did not decode; `reason` is for logs only.
    Dropped { reason: String },
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireEvent {
    kind: String,
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    resource_id: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    body: Value,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct ResourceChangedBody {
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ChildChangedBody {
    key: Value,
    data: Value,
}

// ── Decoding ─────────────────────────────────────────────────────────

/// Decode one text frame from a push transport.
pub fn decode_frame(text: &str) -> FrameOutcome {
    match envelope::decode(text) {
        DecodedEnvelope::Success(success) => match decode_event(success) {
            Ok(event) => FrameOutcome::Event(event),
            Err(reason) => FrameOutcome::Dropped { reason },
        },
        DecodedEnvelope::Error(err) if err.is_schema_violation() => FrameOutcome::Dropped {
            reason: err.message,
        },
        DecodedEnvelope::Error(err) => FrameOutcome::Rejected(err),
    }
}

/// Interpret a success envelope's payload as a stream event.
pub fn decode_event(success: SuccessEnvelope) -> Result<StreamEvent, String> {
    let wire: WireEvent =
        serde_json::from_value(success.payload).map_err(|e| format!("malformed event: {e}"))?;

    let timestamp = match wire.timestamp.as_deref() {
        Some(raw) => envelope::parse_timestamp(raw)
            .map_err(|e| format!("event timestamp '{raw}' is not RFC3339: {e}"))?,
        None => success
            .timestamp
            .ok_or_else(|| format!("event '{}' has no timestamp", wire.kind))?,
    };

    let kind = match wire.kind.as_str() {
        KIND_SNAPSHOT => {
            if !wire.body.is_object() {
                return Err("snapshot body is not an object".into());
            }
            EventKind::Snapshot { payload: wire.body }
        }
        KIND_RESOURCE_CHANGED => {
            let body: ResourceChangedBody = serde_json::from_value(wire.body)
                .map_err(|e| format!("malformed {KIND_RESOURCE_CHANGED} body: {e}"))?;
            EventKind::ResourceChanged {
                fields: body.fields,
            }
        }
        KIND_CHILD_CHANGED => {
            let body: ChildChangedBody = serde_json::from_value(wire.body)
                .map_err(|e| format!("malformed {KIND_CHILD_CHANGED} body: {e}"))?;
            let key = key_string(&body.key)
                .ok_or_else(|| format!("{KIND_CHILD_CHANGED} key must be a string or number"))?;
            EventKind::ChildChanged {
                key,
                data: body.data,
            }
        }
        KIND_HEARTBEAT => EventKind::Heartbeat,
        _ => EventKind::Unknown {
            kind: wire.kind,
            body: wire.body,
        },
    };

    Ok(StreamEvent {
        kind,
        version: wire.version,
        resource_id: wire.resource_id,
        timestamp,
        correlation_id: success.correlation_id,
    })
}

/// Render a JSON key as the opaque string used to address a child.
///
/// Numeric keys are accepted because some backends emit integer ids.
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────
