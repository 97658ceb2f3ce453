//! Error types for the marginalia domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! The provider and bridge each have their own error enum, and both convert
//! into [`StreamError`], the caller-facing taxonomy that a streaming session
//! resolves with.

use thiserror::Error;

/// Failures talking to an upstream LLM HTTP endpoint.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures of the session-addressed channel bridge.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("Session already connected: {0}")]
    DuplicateSession(String),

    #[error("Session disconnected: {0}")]
    Disconnected(String),

    #[error("Invalid bridge message: {0}")]
    InvalidMessage(String),
}

/// The error a streaming session resolves with.
///
/// Parse-level problems never show up here: malformed SSE lines are skipped
/// where they are read. Everything in this enum is delivered to the caller
/// exactly once per session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    /// Network or HTTP failure opening or reading the stream.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The session-local timeout elapsed before a terminal signal.
    #[error("Stream timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The upstream rejected our credentials.
    #[error("Authentication required: {0}")]
    Auth(String),

    /// The upstream answered with a non-success status.
    #[error("Upstream API error ({status_code}): {message}")]
    Api { status_code: u16, message: String },

    /// The session was used in a way its state machine does not allow.
    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

impl StreamError {
    /// Whether a blind retry of the same request is reasonable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Api { status_code, .. } => *status_code == 429 || *status_code >= 500,
            Self::Auth(_) | Self::InvalidState(_) => false,
        }
    }

    /// Whether the caller should re-authenticate before trying again.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Stable short code used on the bridge wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Auth(_) => "auth",
            Self::Api { .. } => "api",
            Self::InvalidState(_) => "invalid_state",
        }
    }

    /// Rebuild a typed error from a wire `code` and message.
    ///
    /// Unknown or missing codes degrade to [`StreamError::Transport`].
    pub fn from_code(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            Some("auth") => Self::Auth(message),
            Some("timeout") => Self::Timeout { elapsed_ms: 0 },
            Some("api") => Self::Api {
                status_code: 0,
                message,
            },
            Some("invalid_state") => Self::InvalidState(message),
            _ => Self::Transport(message),
        }
    }
}

impl From<ProviderError> for StreamError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::AuthenticationFailed(msg) => Self::Auth(msg),
            ProviderError::ApiError {
                status_code: 401 | 403,
                message,
            } => Self::Auth(message),
            ProviderError::ApiError {
                status_code,
                message,
            } => Self::Api {
                status_code,
                message,
            },
            ProviderError::RateLimited { retry_after_secs } => Self::Api {
                status_code: 429,
                message: format!("rate limited, retry after {retry_after_secs}s"),
            },
            ProviderError::Timeout(_) => Self::Timeout { elapsed_ms: 0 },
            ProviderError::StreamInterrupted(msg) | ProviderError::Network(msg) => {
                Self::Transport(msg)
            }
        }
    }
}

impl From<BridgeError> for StreamError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::DuplicateSession(id) => {
                Self::InvalidState(format!("session '{id}' is already connected"))
            }
            BridgeError::Disconnected(_) | BridgeError::InvalidMessage(_) => {
                Self::Transport(err.to_string())
            }
        }
    }
}
