//! Unary request executor with bounded retry and backoff.
//!
//! One logical call = up to `max_attempts` HTTP attempts. Each attempt runs
//! under a hard timeout that is independent of the retry budget. Outcomes:
//!
//! - 2xx → success. Empty body is an empty object; unparseable bodies go
//!   through [`repair_json`] and fall back to raw text.
//! - 429 / 5xx → retry after ms hint > seconds hint > exponential backoff.
//! - other 4xx → fatal immediately.
//! - network failure or attempt timeout → retry on the backoff schedule.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::errors::{truncate_body, AttemptFailure, TransportError};
use super::http::{HttpBackend, HttpRequest, RawResponse, DEFAULT_REQUEST_TIMEOUT};
use super::policy::{next_delay, PendingCall, RetryPolicy};
use super::repair::repair_json;

// ─── Response Types ──────────────────────────────────────────────────────────

/// Decoded body of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Parsed (possibly repaired) JSON.
    Json(Value),
    /// Body that could not be parsed even after repair.
    Raw(String),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            ResponseBody::Raw(_) => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            ResponseBody::Raw(_) => None,
        }
    }
}

/// A successful response after retries.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ResponseBody,
    /// How many attempts it took.
    pub attempts: u32,
}

// ─── RequestExecutor ─────────────────────────────────────────────────────────

/// Issues request/response calls with retry. Cheap to clone.
#[derive(Clone)]
pub struct RequestExecutor {
    backend: Arc<dyn HttpBackend>,
    attempt_timeout: Duration,
}

impl RequestExecutor {
    pub fn new(backend: Arc<dyn HttpBackend>) -> Self {
        Self {
            backend,
            attempt_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the per-attempt hard timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Serialize `body` as JSON and POST it.
    pub async fn execute_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &T,
        policy: &RetryPolicy,
    ) -> Result<HttpResponse, TransportError> {
        let bytes = serde_json::to_vec(body).map_err(|e| TransportError::InvalidRequest {
            url: url.to_string(),
            reason: format!("failed to serialize body: {e}"),
        })?;
        let mut headers = headers.to_vec();
        if !headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        self.execute(url, &headers, Some(&bytes), policy).await
    }

    /// Issue one logical call. POST when `body` is present, GET otherwise.
    pub async fn execute(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Option<&[u8]>,
        policy: &RetryPolicy,
    ) -> Result<HttpResponse, TransportError> {
        let request = HttpRequest::new(url, headers, body);
        let request_id = Uuid::new_v4();
        let mut call = PendingCall::new(self.attempt_timeout);

        loop {
            call.begin_attempt();
            tracing::debug!(%request_id, url, attempt = call.attempt, "sending request");

            let outcome = tokio::time::timeout_at(call.deadline, self.backend.do_request(&request))
                .await
                .unwrap_or(Err(AttemptFailure::TimedOut {
                    timeout_ms: self.attempt_timeout.as_millis() as u64,
                }));

            match outcome {
                Ok(response) if response.is_success() => {
                    return Ok(decode_success(url, response, call.attempt));
                }
                Ok(response) if is_retryable_status(response.status) => {
                    if !call.has_budget(policy) {
                        tracing::warn!(
                            %request_id,
                            url,
                            status = response.status,
                            attempts = call.attempt,
                            "retries exhausted"
                        );
                        return Err(TransportError::RetriesExhausted {
                            url: url.to_string(),
                            status: response.status,
                            attempts: call.attempt,
                            body: truncate_body(&response.body_text()),
                        });
                    }
                    let (delay, source) = next_delay(policy, call.attempt, |name| response.header(name));
                    call.next_delay = delay;
                    tracing::warn!(
                        %request_id,
                        url,
                        status = response.status,
                        attempt = call.attempt,
                        delay_ms = delay.as_millis() as u64,
                        source = ?source,
                        "retryable status, backing off"
                    );
                }
                Ok(response) => {
                    tracing::warn!(%request_id, url, status = response.status, "non-retryable status");
                    return Err(TransportError::ClientFault {
                        url: url.to_string(),
                        status: response.status,
                        body: truncate_body(&response.body_text()),
                    });
                }
                Err(cause) => {
                    if !call.has_budget(policy) {
                        tracing::warn!(%request_id, url, attempts = call.attempt, error = %cause, "transport retries exhausted");
                        return Err(TransportError::Unreachable {
                            url: url.to_string(),
                            attempts: call.attempt,
                            cause,
                        });
                    }
                    call.next_delay = policy.backoff_delay(call.attempt);
                    tracing::warn!(
                        %request_id,
                        url,
                        attempt = call.attempt,
                        delay_ms = call.next_delay.as_millis() as u64,
                        error = %cause,
                        "transport failure, backing off"
                    );
                }
            }

            tokio::time::sleep(call.next_delay).await;
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Turn a 2xx body into a structured value, degrading instead of failing.
fn decode_success(url: &str, response: RawResponse, attempts: u32) -> HttpResponse {
    let text = String::from_utf8_lossy(&response.body);
    let body = if text.trim().is_empty() {
        ResponseBody::Json(Value::Object(serde_json::Map::new()))
    } else if let Ok(value) = serde_json::from_str::<Value>(&text) {
        ResponseBody::Json(value)
    } else if let Some(value) = repair_json(&text) {
        tracing::info!(url, "repaired malformed JSON response body");
        ResponseBody::Json(value)
    } else {
        tracing::warn!(url, bytes = response.body.len(), "unparseable response body, returning raw text");
        ResponseBody::Raw(text.into_owned())
    };

    HttpResponse {
        status: response.status,
        headers: response.headers,
        body,
        attempts,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
