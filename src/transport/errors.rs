//! Transport error types.
//!
//! Only fatal outcomes surface here: retries, repairs and dropped stream
//! events are handled inside the executors. Every variant carries the url and
//! enough of the response or cause to build a useful log entry.

use thiserror::Error;

/// Longest response body kept in an error, in characters.
pub const MAX_ERROR_BODY_CHARS: usize = 2000;

/// A failure of a single attempt, before retry policy is applied.
#[derive(Debug, Clone, Error)]
pub enum AttemptFailure {
    /// DNS, connect, reset, body read failure.
    #[error("{0}")]
    Network(String),
    /// The per-attempt hard timeout elapsed.
    #[error("attempt timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
}

/// Fatal errors returned by the request and stream executors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Non-retryable 4xx response.
    #[error("HTTP {status} from {url}: {body}")]
    ClientFault {
        url: String,
        status: u16,
        body: String,
    },

    /// 429/5xx on every attempt.
    #[error("HTTP {status} from {url} after {attempts} attempts: {body}")]
    RetriesExhausted {
        url: String,
        status: u16,
        attempts: u32,
        body: String,
    },

    /// Transport-level failure on every attempt.
    #[error("request to {url} failed after {attempts} attempts: {cause}")]
    Unreachable {
        url: String,
        attempts: u32,
        cause: AttemptFailure,
    },

    /// The stream's initial response was not 2xx.
    #[error("stream to {url} rejected with HTTP {status}: {body}")]
    StreamRejected {
        url: String,
        status: u16,
        body: String,
    },

    /// The stream could not be opened or broke mid-read.
    #[error("stream to {url} failed: {cause}")]
    StreamBroken { url: String, cause: AttemptFailure },

    /// Too many consecutive unparseable stream events.
    #[error("stream to {url} tripped the circuit breaker after {failures} consecutive unparseable events (last: {last_payload})")]
    CircuitOpen {
        url: String,
        failures: u32,
        last_payload: String,
    },

    /// The caller cancelled the stream.
    #[error("stream to {url} cancelled")]
    Cancelled { url: String },

    /// The request could not be built (bad header, unserializable body).
    #[error("invalid request for {url}: {reason}")]
    InvalidRequest { url: String, reason: String },

    /// The HTTP client itself could not be constructed.
    #[error("failed to build HTTP client: {reason}")]
    Setup { reason: String },
}

impl TransportError {
    /// The url the failing call targeted.
    pub fn url(&self) -> Option<&str> {
        let url = match self {
            TransportError::ClientFault { url, .. }
            | TransportError::RetriesExhausted { url, .. }
            | TransportError::Unreachable { url, .. }
            | TransportError::StreamRejected { url, .. }
            | TransportError::StreamBroken { url, .. }
            | TransportError::CircuitOpen { url, .. }
            | TransportError::Cancelled { url }
            | TransportError::InvalidRequest { url, .. } => url,
            TransportError::Setup { .. } => return None,
        };
        Some(url)
    }

    /// Whether the peer could not be reached or kept failing server-side.
    ///
    /// A 4xx answer or a request that could not be built says nothing about
    /// the connection, so those return false.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable { .. }
                | TransportError::RetriesExhausted { .. }
                | TransportError::StreamBroken { .. }
        )
    }

    /// The last HTTP status observed, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::ClientFault { status, .. }
            | TransportError::RetriesExhausted { status, .. }
            | TransportError::StreamRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Truncate a body for inclusion in an error, on a char boundary.
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => format!("{}...(truncated)", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_bodies_are_untouched() {
        assert_eq!(truncate_body("oops"), "oops");
    }

    #[test]
    fn test_long_bodies_are_truncated_on_char_boundary() {
        let body = "é".repeat(MAX_ERROR_BODY_CHARS + 10);
        let out = truncate_body(&body);
        assert!(out.ends_with("...(truncated)"));
        assert_eq!(
            out.trim_end_matches("...(truncated)").chars().count(),
            MAX_ERROR_BODY_CHARS
        );
    }

    #[test]
    fn test_accessors_expose_url_and_status() {
        let err = TransportError::RetriesExhausted {
            url: "http://x/v1".into(),
            status: 503,
            attempts: 3,
            body: "busy".into(),
        };
        assert_eq!(err.url(), Some("http://x/v1"));
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("after 3 attempts"));

        let err = TransportError::Cancelled { url: "http://y".into() };
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_only_unreachable_peers_are_connection_failures() {
        let fault = TransportError::ClientFault {
            url: "http://x/mcp".into(),
            status: 400,
            body: "bad params".into(),
        };
        assert!(!fault.is_connection_failure());

        let invalid = TransportError::InvalidRequest {
            url: "http://x/mcp".into(),
            reason: "bad header".into(),
        };
        assert!(!invalid.is_connection_failure());

        let down = TransportError::Unreachable {
            url: "http://x/mcp".into(),
            attempts: 3,
            cause: AttemptFailure::Network("connection refused".into()),
        };
        assert!(down.is_connection_failure());

        let busy = TransportError::RetriesExhausted {
            url: "http://x/mcp".into(),
            status: 503,
            attempts: 3,
            body: String::new(),
        };
        assert!(busy.is_connection_failure());
    }
}
