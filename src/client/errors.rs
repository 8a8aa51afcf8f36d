//! Tool client error types.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors from a single tool-server connection.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server process could not be started.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The `initialize` handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// Pipe I/O failure or the server went away.
    #[error("transport error for server '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// The HTTP executor gave up.
    #[error("HTTP transport error for server '{server}': {source}")]
    Http {
        server: String,
        #[source]
        source: TransportError,
    },

    /// The server answered with a JSON-RPC error response.
    #[error("server '{server}' error [{code}]: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The server answered with something that is not a usable response.
    #[error("invalid response from server '{server}': {reason}")]
    InvalidResponse { server: String, reason: String },

    /// No response within the call timeout.
    #[error("'{method}' on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The connection was already closed.
    #[error("server '{server}' connection is closed")]
    Closed { server: String },
}

impl ClientError {
    /// Whether this failure means the connection itself is gone.
    ///
    /// RPC error responses, malformed payloads, per-call timeouts and HTTP
    /// 4xx answers leave the connection usable.
    pub fn is_transport_failure(&self) -> bool {
        match self {
            ClientError::Rpc { .. }
            | ClientError::InvalidResponse { .. }
            | ClientError::Timeout { .. } => false,
            ClientError::Http { source, .. } => source.is_connection_failure(),
            _ => true,
        }
    }
}
