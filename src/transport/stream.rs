//! Server-sent-event stream executor.
//!
//! Opens one streaming call and hands every parsed `data:` payload to the
//! caller in wire order, followed by exactly one terminal `done` callback.
//! Unparseable payloads go through the JSON repair pass; if that fails they
//! are dropped and counted. A run of consecutive drops trips the circuit
//! breaker and fails the call. The connection is released on every exit path.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::errors::{truncate_body, AttemptFailure, TransportError, MAX_ERROR_BODY_CHARS};
use super::http::{ByteStream, HttpBackend, HttpRequest, DEFAULT_CONNECT_TIMEOUT};
use super::repair::repair_json;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Consecutive unparseable events that fail the stream.
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 10;

/// Terminal sentinel payload.
pub const DONE_SENTINEL: &str = "[DONE]";

// ─── StreamSummary ───────────────────────────────────────────────────────────

/// Counters for a stream that completed without a fatal error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Events handed to the callback (excluding the final `done`).
    pub delivered: u64,
    /// Unparseable events that were dropped.
    pub dropped: u64,
    /// Whether the stream ended on `[DONE]` rather than end-of-body.
    pub completed_by_sentinel: bool,
}

// ─── StreamExecutor ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct StreamExecutor {
    backend: Arc<dyn HttpBackend>,
    breaker_threshold: u32,
    open_timeout: Duration,
}

impl StreamExecutor {
    pub fn new(backend: Arc<dyn HttpBackend>) -> Self {
        Self {
            backend,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            open_timeout: DEFAULT_CONNECT_TIMEOUT * 6,
        }
    }

    /// Override the breaker threshold. Values below 1 are clamped to 1.
    pub fn with_breaker_threshold(mut self, threshold: u32) -> Self {
        self.breaker_threshold = threshold.max(1);
        self
    }

    /// Override how long to wait for the initial response headers.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn breaker_threshold(&self) -> u32 {
        self.breaker_threshold
    }

    /// Run one streaming call.
    ///
    /// `on_event(Some(event), false)` is called for each parsed event and
    /// `on_event(None, true)` exactly once when the stream completes. On a
    /// fatal error or cancellation no `done` callback is made.
    pub async fn stream<F>(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Option<&[u8]>,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<StreamSummary, TransportError>
    where
        F: FnMut(Option<Value>, bool),
    {
        let request = HttpRequest::new(url, headers, body);

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(TransportError::Cancelled { url: url.to_string() });
            }
            opened = tokio::time::timeout(self.open_timeout, self.backend.do_stream(&request)) => opened,
        };

        let response = match opened {
            Ok(Ok(response)) => response,
            Ok(Err(cause)) => {
                tracing::warn!(url, error = %cause, "failed to open stream");
                return Err(TransportError::StreamBroken {
                    url: url.to_string(),
                    cause,
                });
            }
            Err(_) => {
                return Err(TransportError::StreamBroken {
                    url: url.to_string(),
                    cause: AttemptFailure::TimedOut {
                        timeout_ms: self.open_timeout.as_millis() as u64,
                    },
                });
            }
        };

        if !response.is_success() {
            let status = response.status;
            let body = tokio::time::timeout(self.open_timeout, read_error_body(response.body))
                .await
                .unwrap_or_default();
            tracing::warn!(url, status, "stream rejected");
            return Err(TransportError::StreamRejected {
                url: url.to_string(),
                status,
                body,
            });
        }

        let mut connection = ConnectionGuard {
            url,
            body: response.body,
        };
        let mut decoder = SseDecoder::default();
        let mut state = StreamState::new(url, self.breaker_threshold);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(url, delivered = state.summary.delivered, "stream cancelled");
                    return Err(TransportError::Cancelled { url: url.to_string() });
                }
                chunk = connection.body.next() => chunk,
            };

            let at_eof = chunk.is_none();
            let payloads = match chunk {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(cause)) => {
                    tracing::warn!(url, error = %cause, "stream broke mid-read");
                    return Err(TransportError::StreamBroken {
                        url: url.to_string(),
                        cause,
                    });
                }
                None => decoder.finish(),
            };

            for payload in payloads {
                if state.handle(&payload, &mut on_event)? == Flow::Done {
                    state.summary.completed_by_sentinel = true;
                    on_event(None, true);
                    tracing::debug!(url, delivered = state.summary.delivered, "stream completed");
                    return Ok(state.summary);
                }
            }

            if at_eof {
                on_event(None, true);
                tracing::debug!(
                    url,
                    delivered = state.summary.delivered,
                    dropped = state.summary.dropped,
                    "stream ended without sentinel"
                );
                return Ok(state.summary);
            }
        }
    }
}

/// Read at most a few KiB of an error body.
async fn read_error_body(mut body: ByteStream) -> String {
    let mut buf = Vec::new();
    while let Some(Ok(chunk)) = body.next().await {
        buf.extend_from_slice(&chunk);
        if buf.len() > MAX_ERROR_BODY_CHARS * 4 {
            break;
        }
    }
    truncate_body(&String::from_utf8_lossy(&buf))
}

// ─── Per-call state ──────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
}

struct StreamState<'a> {
    url: &'a str,
    threshold: u32,
    consecutive_failures: u32,
    summary: StreamSummary,
}

impl<'a> StreamState<'a> {
    fn new(url: &'a str, threshold: u32) -> Self {
        Self {
            url,
            threshold,
            consecutive_failures: 0,
            summary: StreamSummary::default(),
        }
    }

    fn handle<F>(&mut self, payload: &str, on_event: &mut F) -> Result<Flow, TransportError>
    where
        F: FnMut(Option<Value>, bool),
    {
        let trimmed = payload.trim();
        if trimmed == DONE_SENTINEL {
            return Ok(Flow::Done);
        }
        // Keep-alive events with an empty data field.
        if trimmed.is_empty() {
            return Ok(Flow::Continue);
        }

        let parsed = serde_json::from_str::<Value>(trimmed)
            .ok()
            .or_else(|| repair_json(trimmed));

        match parsed {
            Some(event) => {
                self.consecutive_failures = 0;
                self.summary.delivered += 1;
                on_event(Some(event), false);
                Ok(Flow::Continue)
            }
            None => {
                self.consecutive_failures += 1;
                self.summary.dropped += 1;
                tracing::warn!(
                    url = self.url,
                    consecutive = self.consecutive_failures,
                    payload = %truncate_body(trimmed),
                    "dropping unparseable stream event"
                );
                if self.consecutive_failures >= self.threshold {
                    tracing::error!(url = self.url, failures = self.consecutive_failures, "stream circuit breaker tripped");
                    return Err(TransportError::CircuitOpen {
                        url: self.url.to_string(),
                        failures: self.consecutive_failures,
                        last_payload: truncate_body(trimmed),
                    });
                }
                Ok(Flow::Continue)
            }
        }
    }
}

/// Owns the response body for the duration of a stream.
struct ConnectionGuard<'a> {
    url: &'a str,
    body: ByteStream,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        tracing::trace!(url = self.url, "stream connection released");
    }
}

// ─── SSE Decoder ─────────────────────────────────────────────────────────────

/// Incremental SSE decoder producing one `data` payload per event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk; returns every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.process_line(line.trim_end_matches(['\n', '\r'])) {
                events.push(event);
            }
        }
        events
    }

    /// Flush whatever is pending once the body has ended.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        if let Some(event) = self.take_event() {
            events.push(event);
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
        None
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let event = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(event)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::http::{RawResponse, StreamingResponse};
    use async_trait::async_trait;
    use futures::stream;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Backend that serves one scripted SSE body.
    struct SseBackend {
        status: u16,
        chunks: Mutex<Option<Vec<String>>>,
        hang_after: bool,
        released: Arc<AtomicBool>,
    }

    impl SseBackend {
        fn new(status: u16, chunks: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                status,
                chunks: Mutex::new(Some(chunks.iter().map(|c| c.to_string()).collect())),
                hang_after: false,
                released: Arc::new(AtomicBool::new(false)),
            })
        }

        fn hanging(chunks: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                status: 200,
                chunks: Mutex::new(Some(chunks.iter().map(|c| c.to_string()).collect())),
                hang_after: true,
                released: Arc::new(AtomicBool::new(false)),
            })
        }

        fn released(&self) -> bool {
            self.released.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpBackend for SseBackend {
        async fn do_request(&self, _request: &HttpRequest) -> Result<RawResponse, AttemptFailure> {
            unimplemented!("stream tests only")
        }

        async fn do_stream(&self, _request: &HttpRequest) -> Result<StreamingResponse, AttemptFailure> {
            let chunks = self.chunks.lock().unwrap().take().unwrap_or_default();
            let guard = DropFlag(self.released.clone());
            let scripted = stream::iter(chunks.into_iter().map(|c| Ok(c.into_bytes())));
            let body = if self.hang_after {
                scripted.chain(stream::pending()).boxed()
            } else {
                scripted.boxed()
            };
            let body = body
                .map(move |chunk| {
                    let _ = &guard;
                    chunk
                })
                .boxed();
            Ok(StreamingResponse {
                status: self.status,
                headers: HashMap::new(),
                body,
            })
        }
    }

    type Events = Vec<(Option<Value>, bool)>;

    async fn run(backend: Arc<SseBackend>, threshold: u32) -> (Result<StreamSummary, TransportError>, Events) {
        let mut events = Vec::new();
        let result = StreamExecutor::new(backend)
            .with_breaker_threshold(threshold)
            .stream("http://llm/v1/stream", &[], Some(b"{}"), &CancellationToken::new(), |event, done| {
                events.push((event, done))
            })
            .await;
        (result, events)
    }

    #[tokio::test]
    async fn test_events_arrive_in_wire_order_and_done_once() {
        let backend = SseBackend::new(
            200,
            &[
                "data: {\"n\": 1}\n\n",
                "data: {\"n\": 2}\n\ndata: {\"n\"",
                ": 3}\n\n",
                "data: [DONE]\n\n",
                "data: {\"n\": 4}\n\n",
            ],
        );
        let (result, events) = run(backend.clone(), 10).await;
        let summary = result.unwrap();

        assert_eq!(
            events,
            vec![
                (Some(json!({"n": 1})), false),
                (Some(json!({"n": 2})), false),
                (Some(json!({"n": 3})), false),
                (None, true),
            ]
        );
        assert!(summary.completed_by_sentinel);
        assert_eq!(summary.delivered, 3);
        assert!(backend.released());
    }

    #[tokio::test]
    async fn test_end_of_body_without_sentinel_still_signals_done() {
        let backend = SseBackend::new(200, &[": keep-alive\n\n", "data: {\"a\": true}"]);
        let (result, events) = run(backend, 10).await;

        assert!(!result.unwrap().completed_by_sentinel);
        assert_eq!(events, vec![(Some(json!({"a": true})), false), (None, true)]);
    }

    #[tokio::test]
    async fn test_malformed_events_are_repaired_or_dropped() {
        let backend = SseBackend::new(
            200,
            &["data: {\"a\": [1, 2,],}\n\n", "data: not json\n\n", "data: {\"b\": 1}\n\n"],
        );
        let (result, events) = run(backend, 10).await;
        let summary = result.unwrap();

        assert_eq!(summary.dropped, 1);
        assert_eq!(
            events,
            vec![
                (Some(json!({"a": [1, 2]})), false),
                (Some(json!({"b": 1})), false),
                (None, true),
            ]
        );
    }

    #[tokio::test]
    async fn test_threshold_consecutive_failures_trip_breaker() {
        let garbage: Vec<&str> = std::iter::repeat("data: garbage\n\n").take(5).collect();
        let backend = SseBackend::new(200, &garbage);
        let (result, events) = run(backend.clone(), 5).await;

        match result.unwrap_err() {
            TransportError::CircuitOpen { failures, last_payload, .. } => {
                assert_eq!(failures, 5);
                assert_eq!(last_payload, "garbage");
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert!(events.is_empty());
        assert!(backend.released());
    }

    #[tokio::test]
    async fn test_valid_event_resets_the_breaker() {
        let mut chunks: Vec<&str> = std::iter::repeat("data: garbage\n\n").take(4).collect();
        chunks.push("data: {\"ok\": 1}\n\n");
        chunks.extend(std::iter::repeat("data: garbage\n\n").take(4));
        chunks.push("data: [DONE]\n\n");
        let backend = SseBackend::new(200, &chunks);
        let (result, events) = run(backend, 5).await;

        let summary = result.unwrap();
        assert_eq!(summary.dropped, 8);
        assert_eq!(events, vec![(Some(json!({"ok": 1})), false), (None, true)]);
    }

    #[tokio::test]
    async fn test_error_status_fails_before_any_event() {
        let backend = SseBackend::new(401, &["{\"error\": \"bad key\"}"]);
        let (result, events) = run(backend, 10).await;

        match result.unwrap_err() {
            TransportError::StreamRejected { status, body, .. } => {
                assert_eq!(status, 401);
                assert!(body.contains("bad key"));
            }
            other => panic!("expected StreamRejected, got {other:?}"),
        }
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_releases_connection_without_done() {
        let backend = SseBackend::hanging(&["data: {\"n\": 1}\n\n"]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut events = Vec::new();

        let result = StreamExecutor::new(backend.clone())
            .stream("http://llm/v1/stream", &[], None, &cancel, |event, done| {
                events.push((event, done));
                trigger.cancel();
            })
            .await;

        assert!(matches!(result, Err(TransportError::Cancelled { .. })));
        assert_eq!(events, vec![(Some(json!({"n": 1})), false)]);
        assert!(backend.released());
    }

    #[test]
    fn test_decoder_joins_multiline_data_and_skips_other_fields() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"event: message\nid: 7\ndata: {\"a\":\r\ndata: 1}\r\n\r\n");
        assert_eq!(events, vec!["{\"a\":\n1}".to_string()]);
    }

    #[test]
    fn test_decoder_survives_utf8_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: {\"t\": \"héllo\"}\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xc3).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec!["{\"t\": \"héllo\"}".to_string()]);
    }
}
