//! HTTP backend seam.
//!
//! The executors never talk to `reqwest` directly; they go through
//! [`HttpBackend`], a two-method capability interface (`do_request`,
//! `do_stream`). [`ReqwestBackend`] is the production implementation. Tests
//! plug in scripted backends.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client as HttpClient;

use super::errors::{AttemptFailure, TransportError};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Whole-request timeout for unary calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Whole-request timeout for streaming calls.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(180);

// ─── Request / Response ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// An outgoing request. Built once per logical call and reused across attempts.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// POST when a body is present, GET otherwise.
    pub fn new(url: &str, headers: &[(String, String)], body: Option<&[u8]>) -> Self {
        Self {
            method: if body.is_some() {
                HttpMethod::Post
            } else {
                HttpMethod::Get
            },
            url: url.to_string(),
            headers: headers.to_vec(),
            body: body.map(<[u8]>::to_vec),
        }
    }
}

/// A fully-read response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Chunked response body. Dropping it releases the connection.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, AttemptFailure>>;

/// A response whose body is still on the wire.
pub struct StreamingResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ByteStream,
}

impl StreamingResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ─── HttpBackend ─────────────────────────────────────────────────────────────

#[async_trait]
pub trait HttpBackend: Send + Sync {
    /// Issue one request and read the whole body.
    async fn do_request(&self, request: &HttpRequest) -> Result<RawResponse, AttemptFailure>;

    /// Issue one request and hand back the body as a chunk stream.
    async fn do_stream(&self, request: &HttpRequest) -> Result<StreamingResponse, AttemptFailure>;
}

// ─── ReqwestBackend ──────────────────────────────────────────────────────────

/// `reqwest`-backed HTTP transport with separate unary and streaming clients.
pub struct ReqwestBackend {
    /// Client for unary requests.
    http: HttpClient,
    /// Client for streaming requests (longer overall timeout).
    http_stream: HttpClient,
}

impl ReqwestBackend {
    pub fn new(
        connect_timeout: Duration,
        request_timeout: Duration,
        stream_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Setup {
                reason: e.to_string(),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .timeout(stream_timeout)
            .build()
            .map_err(|e| TransportError::Setup {
                reason: format!("streaming client: {e}"),
            })?;

        Ok(Self { http, http_stream })
    }

    /// Backend with the default timeouts.
    pub fn with_defaults() -> Result<Self, TransportError> {
        Self::new(
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_REQUEST_TIMEOUT,
            DEFAULT_STREAM_TIMEOUT,
        )
    }

    fn build(&self, client: &HttpClient, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            HttpMethod::Get => client.get(&request.url),
            HttpMethod::Post => client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn do_request(&self, request: &HttpRequest) -> Result<RawResponse, AttemptFailure> {
        let response = self
            .build(&self.http, request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(classify_reqwest_error)?
            .to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    async fn do_stream(&self, request: &HttpRequest) -> Result<StreamingResponse, AttemptFailure> {
        let response = self
            .build(&self.http_stream, request)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(classify_reqwest_error)
            })
            .boxed();

        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn collect_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Flatten a reqwest error and its source chain into one attempt failure.
fn classify_reqwest_error(err: reqwest::Error) -> AttemptFailure {
    if err.is_timeout() {
        return AttemptFailure::TimedOut { timeout_ms: 0 };
    }
    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    AttemptFailure::Network(message)
}
