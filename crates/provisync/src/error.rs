//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use provisync_config::ConfigError;
use provisync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    #[allow(dead_code)]
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const REJECTED: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(provisync::connection_failed),
        help(
            "Check that the backend is running and reachable.\n\
             URL: {url}\n\
             Self-signed certificate? Try --insecure (-k) or set ca_cert in the profile."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(provisync::auth_failed),
        help(
            "Verify the bearer token for profile '{profile}'.\n\
             Store one with: provisync config set-token <TOKEN>"
        )
    )]
    AuthFailed { profile: String, message: String },

    // ── Backend ──────────────────────────────────────────────────────

    #[error("Backend rejected the request ({code}): {message}")]
    #[diagnostic(code(provisync::rejected))]
    Rejected {
        code: String,
        message: String,
        #[help]
        hint: Option<String>,
    },

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Request timed out")]
    #[diagnostic(
        code(provisync::timeout),
        help("Increase timeout with --timeout or check backend responsiveness.")
    )]
    Timeout,

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(provisync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(provisync::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: provisync config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Resource type '{name}' is not configured")]
    #[diagnostic(
        code(provisync::unknown_resource),
        help("Add a [resources.{name}] table to {path}")
    )]
    UnknownResource { name: String, path: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(provisync::no_config),
        help(
            "Create one with: provisync config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(provisync::config))]
    Config(Box<ConfigError>),

    #[error("{0}")]
    #[diagnostic(code(provisync::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(provisync::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Timeout => exit_code::TIMEOUT,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Validation { .. } | Self::UnknownResource { .. } | Self::ProfileNotFound { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::ProfileNotFound { name } => Self::ProfileNotFound {
                name,
                available: String::new(),
            },
            ConfigError::UnknownResource { name } => Self::UnknownResource {
                name,
                path: provisync_config::config_path().display().to_string(),
            },
            other => Self::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let retryable = err.is_retryable();
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },

            CoreError::AuthenticationFailed { message } => Self::AuthFailed {
                profile: "current".into(),
                message,
            },

            CoreError::Timeout => Self::Timeout,

            CoreError::Rejected(envelope) => {
                let hint = match envelope.retry_after() {
                    Some(d) => Some(format!("Retry after {}", humantime::format_duration(d))),
                    None if retryable => Some("The backend marked this error as retryable".into()),
                    None => None,
                };
                Self::Rejected {
                    code: envelope.code,
                    message: envelope.message,
                    hint,
                }
            }

            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}
