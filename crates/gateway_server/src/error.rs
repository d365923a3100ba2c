//! Error types for the gateway.
//!
//! Codec failures are recoverable per message and never tear down the
//! connection that produced them. Transport failures are fatal to that
//! connection only. Nothing in here is process-fatal once the listener is
//! bound.

use crate::protocol::status;
use thiserror::Error;

/// Failures raised while decoding or encoding the wire protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The outer envelope could not be parsed, has no header, or carries a
    /// kind outside the valid range.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The body did not match the schema of its kind.
    #[error("Malformed payload for kind {kind}: {reason}")]
    MalformedPayload { kind: u32, reason: String },

    /// The kind is inside the valid range but no payload schema exists for it.
    #[error("Unknown message kind: {0}")]
    UnknownKind(u32),

    /// No handler or encoder is registered for the kind.
    #[error("Unsupported message kind: {0}")]
    UnsupportedKind(u32),

    #[error("Encode failure: {0}")]
    EncodeFailure(String),
}

/// Failures reported by an [`Authenticator`](crate::services::Authenticator).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Authentication backend unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by the user and room directories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Directory backend unavailable: {0}")]
    Unavailable(String),
}

/// Top-level error type for the gateway server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The registry is at its connection ceiling.
    #[error("Connection limit reached")]
    CapacityExceeded,

    /// The message requires a logged-in connection.
    #[error("Connection is not authenticated")]
    NotAuthenticated,

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Read or write failure on a single connection's socket.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The worker pool no longer accepts tasks.
    #[error("Worker pool is closed")]
    PoolClosed,

    /// Listener level failures (bind, accept, socket options).
    #[error("Network error: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ServerError {
    /// Status code carried in the error response sent back to a client.
    pub fn status_code(&self) -> i32 {
        match self {
            ServerError::Codec(_) => status::BAD_REQUEST,
            ServerError::CapacityExceeded => status::CONNECTION_LIMIT,
            ServerError::NotAuthenticated => status::NOT_AUTHENTICATED,
            ServerError::Auth(_) => status::AUTH_FAILED,
            ServerError::Directory(DirectoryError::NotFound(_)) => status::NOT_FOUND,
            _ => status::INTERNAL,
        }
    }

    /// Short client-facing message for the error response.
    pub fn client_message(&self) -> &'static str {
        match self {
            ServerError::Codec(_) => "Bad request",
            ServerError::CapacityExceeded => "Connection limit reached",
            ServerError::NotAuthenticated => "Not authenticated",
            ServerError::Auth(_) => "Authentication failed",
            ServerError::Directory(DirectoryError::NotFound(_)) => "Not found",
            _ => "Internal server error",
        }
    }

    /// Whether the error means the connection's transport is gone.
    pub fn is_transport(&self) -> bool {
        matches!(self, ServerError::Transport(_))
    }
}
