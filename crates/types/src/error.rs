//! Unified error type for the promptgate workspace.

use thiserror::Error;

/// Why a bearer token was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The token (or the header carrying it) could not be parsed.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// No signing key in the key set matches the token's key id.
    #[error("signing key not found: {0}")]
    KeyNotFound(String),

    /// The token's `exp` claim is in the past.
    #[error("token expired")]
    Expired,

    /// The key was found but the signature or a checked claim did not verify.
    #[error("token rejected: {0}")]
    InvalidSignature(String),

    /// The remote key set could not be fetched or decoded.
    #[error("key source unreachable: {0}")]
    KeySourceUnreachable(String),
}

/// Enumerates all error kinds that can occur across promptgate crates.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Caller authentication failed; no upstream connection was opened.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// The upstream endpoint could not be reached (connect / send failure).
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// The upstream answered with a non-success status.
    #[error("upstream error: status={status}, body={body}")]
    UpstreamRejected { status: u16, body: String },

    /// The inbound connection could not be upgraded to a WebSocket.
    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),

    /// The upstream duplex endpoint could not be dialed.
    #[error("upstream dial failed: {0}")]
    UpstreamDialFailed(String),

    /// I/O failure after a session was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The client request is missing a field or is otherwise invalid.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No route or resource matches the request.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, GatewayError>;
