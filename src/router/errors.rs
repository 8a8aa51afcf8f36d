//! Router error types.

use thiserror::Error;

use crate::client::ClientError;

/// Errors from routing a call or managing the client set.
///
/// Routing faults are scoped to the one call that hit them; they never mark
/// a client dead or rebuild the routing table.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No client exposes a tool under this name.
    #[error("unknown tool: '{name}'")]
    NotFound { name: String },

    /// The owning client is known but no longer connected.
    #[error("tool '{tool}' is unavailable: client '{client}' is not connected")]
    Unavailable { tool: String, client: String },

    /// A client with this name is already registered.
    #[error("client '{name}' is already registered")]
    DuplicateClient { name: String },

    /// No client with this name is registered.
    #[error("unknown client: '{name}'")]
    UnknownClient { name: String },

    /// The client was added but its handshake failed; it is kept as failed.
    #[error("client '{client}' failed to initialize: {source}")]
    Handshake {
        client: String,
        #[source]
        source: ClientError,
    },

    /// The owning client returned an error for the call.
    #[error("tool '{tool}' on client '{client}' failed: {source}")]
    Call {
        tool: String,
        client: String,
        #[source]
        source: ClientError,
    },

    /// The client could not be constructed at all.
    #[error(transparent)]
    Client(#[from] ClientError),
}
