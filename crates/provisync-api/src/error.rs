use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `provisync-api` crate.
///
/// Only transport-level failures live here. Business errors and malformed
/// envelopes are ordinary values ([`DecodedEnvelope::Error`]) and never
/// travel through `Result`.
///
/// [`DecodedEnvelope::Error`]: crate::envelope::DecodedEnvelope::Error
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, reset, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The push endpoint answered with a non-success HTTP status.
    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// TLS setup error (unreadable CA file, bad certificate, etc.)
    #[error("TLS error: {0}")]
    Tls(String),

    /// Endpoint scheme has no push transport.
    #[error("Unsupported endpoint scheme '{0}' (expected http, https, ws or wss)")]
    UnsupportedScheme(String),

    /// Resource id that cannot stand as a single path segment.
    #[error("Invalid resource id '{0}'")]
    InvalidResourceId(String),

    // ── Socket ──────────────────────────────────────────────────────
    /// WebSocket connection failed or broke mid-stream.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the server.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// No keepalive response arrived within the grace period.
    #[error("No keepalive response within {grace:?}")]
    KeepaliveTimeout { grace: Duration },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } => true,
            Self::KeepaliveTimeout { .. } => true,
            Self::InvalidUrl(_)
            | Self::Tls(_)
            | Self::UnsupportedScheme(_)
            | Self::InvalidResourceId(_) => false,
        }
    }

    /// Returns `true` if the server rejected our credentials.
    pub fn is_auth_rejected(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => *status == 401 || *status == 403,
            Self::Transport(e) => e
                .status()
                .is_some_and(|s| s == reqwest::StatusCode::UNAUTHORIZED || s == reqwest::StatusCode::FORBIDDEN),
            _ => false,
        }
    }
}
