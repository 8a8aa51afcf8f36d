//! Resilient HTTP transport.
//!
//! Turns flaky network calls into dependable operations:
//!
//! - [`RequestExecutor`]: unary calls with bounded retry, server retry hints
//!   and exponential backoff
//! - [`StreamExecutor`]: SSE streams with ordered delivery, JSON repair,
//!   a consecutive-failure circuit breaker and explicit cancellation
//! - [`repair_json`]: best-effort recovery of malformed JSON payloads
//! - [`HttpBackend`]: the capability seam both executors sit on
//!
//! Retries never leak out of this module: callers see a final success or a
//! [`TransportError`].

pub mod errors;
pub mod executor;
pub mod http;
pub mod policy;
pub mod repair;
pub mod stream;

pub use errors::{truncate_body, AttemptFailure, TransportError, MAX_ERROR_BODY_CHARS};
pub use executor::{HttpResponse, RequestExecutor, ResponseBody};
pub use http::{
    ByteStream, HttpBackend, HttpMethod, HttpRequest, RawResponse, ReqwestBackend,
    StreamingResponse, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_STREAM_TIMEOUT,
};
pub use policy::{next_delay, DelaySource, PendingCall, RetryPolicy};
pub use repair::repair_json;
pub use stream::{SseDecoder, StreamExecutor, StreamSummary, DEFAULT_BREAKER_THRESHOLD, DONE_SENTINEL};
