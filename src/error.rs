//! Error types for the auth gateway

use std::io;

use thiserror::Error;

/// Result type alias for the auth gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Auth gateway errors
///
/// Every variant maps to a stable machine-readable code via [`Error::code`].
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing client id, bad URL, invalid config file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// OAuth `state` parameter could not be parsed
    #[error("Invalid OAuth state: {0}")]
    InvalidState(String),

    /// Provider is not configured for OAuth
    #[error("Unknown OAuth provider: {0}")]
    UnknownProvider(String),

    /// No pending PKCE verifier for the given state
    #[error("Missing PKCE code verifier for state")]
    MissingCodeVerifier,

    /// Authorization code exchange rejected upstream
    #[error("Token exchange failed: HTTP {status} - {body}")]
    TokenExchangeFailed {
        /// Upstream HTTP status
        status: u16,
        /// Upstream response body
        body: String,
    },

    /// Refresh grant rejected upstream
    #[error("Token refresh failed: HTTP {status} - {body}")]
    TokenRefreshFailed {
        /// Upstream HTTP status
        status: u16,
        /// Upstream response body
        body: String,
    },

    /// Refresh requested but no refresh token is on file
    #[error("No refresh token stored for provider {0}")]
    NoRefreshToken(String),

    /// Dynamic client registration failed
    #[error("Client registration failed: {message}")]
    RegistrationFailed {
        /// Upstream HTTP status, if a response was received
        status: Option<u16>,
        /// Failure description
        message: String,
    },

    /// `initialize` handshake with an upstream provider failed
    #[error("Session initialization failed: {0}")]
    SessionInitFailed(String),

    /// Upstream returned a JSON-RPC error for `tools/call`
    #[error("Tool call failed ({code}): {message}")]
    ToolCallFailed {
        /// JSON-RPC error code
        code: i32,
        /// JSON-RPC error message
        message: String,
        /// Optional error data
        data: Option<serde_json::Value>,
    },

    /// Provider id not present in the registry
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Request signature did not verify
    #[error("Invalid signature")]
    SignatureInvalid,

    /// Refresh schedule webhook rejected
    #[error("Publish failed: {message}")]
    PublishFailed {
        /// Upstream HTTP status, if a response was received
        status: Option<u16>,
        /// Failure description
        message: String,
    },

    /// Token store failure
    #[error("Token store error: {0}")]
    Store(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Stable machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            Self::MissingCodeVerifier => "MISSING_CODE_VERIFIER",
            Self::TokenExchangeFailed { .. } => "TOKEN_EXCHANGE_FAILED",
            Self::TokenRefreshFailed { .. } => "TOKEN_REFRESH_FAILED",
            Self::NoRefreshToken(_) => "NO_REFRESH_TOKEN",
            Self::RegistrationFailed { .. } => "REGISTRATION_FAILED",
            Self::SessionInitFailed(_) => "SESSION_INIT_FAILED",
            Self::ToolCallFailed { .. } => "TOOL_CALL_FAILED",
            Self::ProviderNotFound(_) => "PROVIDER_NOT_FOUND",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::PublishFailed { .. } => "PUBLISH_FAILED",
            Self::Store(_) => "STORE_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Http(_) => "HTTP_ERROR",
        }
    }

    /// Upstream HTTP status carried by the error, if any
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::TokenExchangeFailed { status, .. } | Self::TokenRefreshFailed { status, .. } => {
                Some(*status)
            }
            Self::RegistrationFailed { status, .. } | Self::PublishFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether the error means the refresh path is dead and the caller should
    /// fall back to the full authorization-code flow.
    #[must_use]
    pub fn is_refresh_failure(&self) -> bool {
        matches!(self, Self::NoRefreshToken(_) | Self::TokenRefreshFailed { .. })
    }
}
