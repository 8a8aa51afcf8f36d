//! JSON-RPC 2.0 envelope types and the fixed error-code taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol version string carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Request identifier. JSON-RPC allows numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(id as i64)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

// ─── Envelopes ───────────────────────────────────────────────────────────────

/// A call that expects a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: RequestId,
}

/// A fire-and-forget message (no `id`, no response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// A successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub jsonrpc: String,
    pub result: serde_json::Value,
    pub id: RequestId,
}

/// An error response. `id` is `null` when the request id could not be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub jsonrpc: String,
    pub error: RpcError,
    pub id: Option<RequestId>,
}

/// The `error` member of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// The taxonomy entry for this code, if it is one of the reserved codes.
    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

/// Any JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Request(Request),
    Notification(Notification),
    Success(SuccessResponse),
    Error(ErrorResponse),
}

impl Envelope {
    /// The id, for envelopes that carry one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Envelope::Request(r) => Some(&r.id),
            Envelope::Success(r) => Some(&r.id),
            Envelope::Error(r) => r.id.as_ref(),
            Envelope::Notification(_) => None,
        }
    }

    /// The method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request(r) => Some(&r.method),
            Envelope::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    /// Whether this is a response (success or error).
    pub fn is_response(&self) -> bool {
        matches!(self, Envelope::Success(_) | Envelope::Error(_))
    }
}

// ─── Error Codes ─────────────────────────────────────────────────────────────

/// Reserved JSON-RPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Invalid JSON was received.
    ParseError,
    /// The JSON sent is not a valid request object.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
}

impl ErrorCode {
    pub const fn code(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -32700 => Some(ErrorCode::ParseError),
            -32600 => Some(ErrorCode::InvalidRequest),
            -32601 => Some(ErrorCode::MethodNotFound),
            -32602 => Some(ErrorCode::InvalidParams),
            -32603 => Some(ErrorCode::InternalError),
            _ => None,
        }
    }

    /// Default human-readable message.
    pub const fn message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
        }
    }
}

// ─── Parse Failures ──────────────────────────────────────────────────────────

/// Why a byte payload could not be decoded into an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailureKind {
    /// Not JSON at all.
    InvalidJson,
    /// JSON, but not a JSON-RPC 2.0 envelope.
    InvalidEnvelope,
}

/// Typed decode failure. Callers decide the recovery policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    pub kind: ParseFailureKind,
    pub message: String,
    /// The request id, when it could be read from otherwise invalid input.
    pub id: Option<RequestId>,
}

impl ParseFailure {
    pub(crate) fn invalid_json(message: impl Into<String>) -> Self {
        Self {
            kind: ParseFailureKind::InvalidJson,
            message: message.into(),
            id: None,
        }
    }

    pub(crate) fn invalid_envelope(message: impl Into<String>, id: Option<RequestId>) -> Self {
        Self {
            kind: ParseFailureKind::InvalidEnvelope,
            message: message.into(),
            id,
        }
    }

    /// The error envelope a server would answer with for this input.
    pub fn to_error_envelope(&self) -> Envelope {
        let code = match self.kind {
            ParseFailureKind::InvalidJson => ErrorCode::ParseError,
            ParseFailureKind::InvalidEnvelope => ErrorCode::InvalidRequest,
        };
        super::codec::make_error(
            code,
            code.message(),
            self.id.clone(),
            Some(serde_json::Value::String(self.message.clone())),
        )
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ParseFailureKind::InvalidJson => write!(f, "invalid JSON: {}", self.message),
            ParseFailureKind::InvalidEnvelope => {
                write!(f, "invalid JSON-RPC envelope: {}", self.message)
            }
        }
    }
}

// ─── Method Names ────────────────────────────────────────────────────────────

/// Methods consumed from tool backends.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
}
