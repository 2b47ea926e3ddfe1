// ── Core error types ──
//
// User-facing errors from provisync-core. Consumers never match on reqwest
// or tungstenite failures directly: the `From<provisync_api::Error>` impl
// translates transport-layer errors into these variants.

use provisync_api::ErrorEnvelope;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Backend rejected credentials: {message}")]
    AuthenticationFailed { message: String },

    #[error("Request timed out")]
    Timeout,

    // ── Operation errors ─────────────────────────────────────────────
    /// Well-formed business error returned by the backend.
    #[error("Rejected by backend: {0}")]
    Rejected(ErrorEnvelope),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout => true,
            Self::Rejected(envelope) => envelope.retryable,
            Self::AuthenticationFailed { .. } | Self::Config { .. } | Self::Internal(_) => false,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<provisync_api::Error> for CoreError {
    fn from(err: provisync_api::Error) -> Self {
        if err.is_auth_rejected() {
            return Self::AuthenticationFailed {
                message: err.to_string(),
            };
        }
        match err {
            provisync_api::Error::Transport(ref e) if e.is_timeout() => Self::Timeout,
            provisync_api::Error::Transport(ref e) => Self::ConnectionFailed {
                url: e
                    .url()
                    .map_or_else(|| "<unknown>".into(), ToString::to_string),
                reason: e.to_string(),
            },
            provisync_api::Error::HttpStatus { ref url, .. } => Self::ConnectionFailed {
                url: url.clone(),
                reason: err.to_string(),
            },
            provisync_api::Error::KeepaliveTimeout { .. } => Self::Timeout,
            provisync_api::Error::WebSocketConnect(reason) => Self::ConnectionFailed {
                url: "<socket>".into(),
                reason,
            },
            provisync_api::Error::WebSocketClosed { .. } => Self::ConnectionFailed {
                url: "<socket>".into(),
                reason: err.to_string(),
            },
            provisync_api::Error::InvalidUrl(e) => Self::Config {
                message: format!("invalid URL: {e}"),
            },
            provisync_api::Error::UnsupportedScheme(_)
            | provisync_api::Error::Tls(_)
            | provisync_api::Error::InvalidResourceId(_) => {
                Self::Config {
                    message: err.to_string(),
                }
            }
        }
    }
}

impl From<ErrorEnvelope> for CoreError {
    fn from(envelope: ErrorEnvelope) -> Self {
        Self::Rejected(envelope)
    }
}
