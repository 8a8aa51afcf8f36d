//! Tool client: one JSON-RPC connection to one tool server.
//!
//! This module handles:
//! - The `initialize` / `notifications/initialized` handshake
//! - Tool and resource listing with cursor pagination
//! - Tool calls, returned exactly as the server sent them
//! - Liveness: a transport failure marks the client dead
//!
//! Transports are pluggable through [`RpcTransport`]: [`StdioTransport`] for
//! spawned server processes, [`HttpRpcTransport`] for HTTP endpoints.

#[allow(clippy::module_inception)]
pub mod client;
pub mod errors;
pub mod transport;
pub mod types;

pub use client::{ToolClient, DEFAULT_CALL_TIMEOUT};
pub use errors::ClientError;
pub use transport::{HttpRpcTransport, RpcTransport, StdioTransport, SHUTDOWN_GRACE};
pub use types::{
    Implementation, InitializeParams, InitializeResult, ResourceDefinition, ToolDefinition,
    PROTOCOL_VERSION,
};
