//! JSON-RPC 2.0 envelope codec.
//!
//! Pure value transforms between typed envelopes and wire bytes:
//! - Building requests, notifications, success and error responses
//! - Serializing envelopes to bytes
//! - Deserializing bytes into an [`Envelope`] or a typed [`ParseFailure`]
//!
//! Nothing in here performs I/O. Transports in [`crate::client`] and the
//! discovery capability query build on these helpers.

pub mod codec;
pub mod types;

pub use codec::{deserialize, from_value, make_error, make_request, make_success, serialize};
pub use types::{
    methods, Envelope, ErrorCode, ErrorResponse, Notification, ParseFailure, ParseFailureKind,
    Request, RequestId, RpcError, SuccessResponse, JSONRPC_VERSION,
};
