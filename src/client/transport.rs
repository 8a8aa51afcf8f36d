//! RPC transports for a tool client.
//!
//! - [`StdioTransport`]: a spawned child process speaking newline-delimited
//!   JSON-RPC over stdin/stdout
//! - [`HttpRpcTransport`]: JSON-RPC envelopes POSTed through the
//!   [`RequestExecutor`], inheriting its retry policy
//!
//! Both implement [`RpcTransport`], the seam [`super::ToolClient`] is built on.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::errors::ClientError;
use crate::config::ServerConfig;
use crate::rpc::{self, Envelope, Notification, Request};
use crate::transport::{RequestExecutor, RetryPolicy};

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long a closing server gets to exit on its own before it is killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ─── RpcTransport ────────────────────────────────────────────────────────────

/// Carries JSON-RPC envelopes to one server.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Human-readable target for logs (`stdio:<command>`, a url).
    fn describe(&self) -> String;

    /// Send a request and wait for the response envelope with the same id.
    async fn request(&self, request: &Request) -> Result<Envelope, ClientError>;

    /// Send a notification. No response is read.
    async fn notify(&self, notification: &Notification) -> Result<(), ClientError>;

    /// Whether the underlying connection is still usable.
    fn is_alive(&self) -> bool;

    /// Tear the connection down. Idempotent.
    async fn close(&self) -> Result<(), ClientError>;
}

// ─── StdioTransport ──────────────────────────────────────────────────────────

struct Pipes {
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

/// JSON-RPC over a child process's stdio.
///
/// One exchange at a time: the pipe lock is held from writing a request
/// until its response is read, so responses cannot be picked up by the
/// wrong caller.
pub struct StdioTransport {
    server: String,
    command: String,
    pipes: Mutex<Pipes>,
    child: Mutex<Child>,
    alive: AtomicBool,
}

impl StdioTransport {
    /// Spawn the server process described by `config`.
    ///
    /// The server's stderr is forwarded line by line to `debug!` logs.
    pub fn spawn(name: &str, config: &ServerConfig) -> Result<Self, ClientError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ClientError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{}: {e}", config.command),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| ClientError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ClientError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        if let Some(stderr) = child.stderr.take() {
            let server = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "{line}");
                }
            });
        }

        tracing::info!(server = name, command = %config.command, pid = child.id(), "server process spawned");

        Ok(Self {
            server: name.to_string(),
            command: config.command.clone(),
            pipes: Mutex::new(Pipes {
                stdin: Some(stdin),
                stdout: BufReader::new(stdout),
            }),
            child: Mutex::new(child),
            alive: AtomicBool::new(true),
        })
    }

    fn transport_error(&self, reason: String) -> ClientError {
        self.alive.store(false, Ordering::SeqCst);
        ClientError::Transport {
            server: self.server.clone(),
            reason,
        }
    }

    async fn write_line(&self, pipes: &mut Pipes, envelope: &Envelope) -> Result<(), ClientError> {
        let mut line = rpc::serialize(envelope).map_err(|e| ClientError::InvalidResponse {
            server: self.server.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        line.push(b'\n');

        let stdin = pipes.stdin.as_mut().ok_or_else(|| ClientError::Closed {
            server: self.server.clone(),
        })?;
        stdin
            .write_all(&line)
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush stdin: {e}")))
    }
}

#[async_trait]
impl RpcTransport for StdioTransport {
    fn describe(&self) -> String {
        format!("stdio:{}", self.command)
    }

    async fn request(&self, request: &Request) -> Result<Envelope, ClientError> {
        if !self.is_alive() {
            return Err(ClientError::Closed {
                server: self.server.clone(),
            });
        }

        let mut pipes = self.pipes.lock().await;
        self.write_line(&mut pipes, &Envelope::Request(request.clone()))
            .await?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = pipes
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))?;
            if read == 0 {
                return Err(self.transport_error("server stdout closed (process may have exited)".into()));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match rpc::deserialize(trimmed.as_bytes()) {
                Ok(envelope) if envelope.is_response() && envelope.id() == Some(&request.id) => {
                    return Ok(envelope);
                }
                Ok(envelope) => {
                    tracing::trace!(server = %self.server, method = ?envelope.method(), "skipping unrelated message");
                }
                Err(_) => {
                    // Servers routinely print log output on stdout.
                    tracing::trace!(server = %self.server, line = %trimmed, "skipping non-JSON-RPC line");
                }
            }
        }
    }

    async fn notify(&self, notification: &Notification) -> Result<(), ClientError> {
        let mut pipes = self.pipes.lock().await;
        self.write_line(&mut pipes, &Envelope::Notification(notification.clone()))
            .await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.alive.store(false, Ordering::SeqCst);

        // Dropping stdin signals EOF; well-behaved servers exit on it.
        drop(self.pipes.lock().await.stdin.take());

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.server, %status, "server process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(ClientError::Transport {
                server: self.server.clone(),
                reason: format!("failed to wait for process: {e}"),
            }),
            Err(_) => {
                tracing::warn!(server = %self.server, "server ignored shutdown, killing");
                child.kill().await.map_err(|e| ClientError::Transport {
                    server: self.server.clone(),
                    reason: format!("failed to kill process: {e}"),
                })
            }
        }
    }
}

// ─── HttpRpcTransport ────────────────────────────────────────────────────────

/// JSON-RPC over HTTP POST.
pub struct HttpRpcTransport {
    server: String,
    url: String,
    headers: Vec<(String, String)>,
    executor: RequestExecutor,
    policy: RetryPolicy,
    alive: AtomicBool,
}

impl HttpRpcTransport {
    pub fn new(server: &str, url: &str, executor: RequestExecutor, policy: RetryPolicy) -> Self {
        Self {
            server: server.to_string(),
            url: url.to_string(),
            headers: vec![(
                "Accept".to_string(),
                "application/json, text/event-stream".to_string(),
            )],
            executor,
            policy,
            alive: AtomicBool::new(true),
        }
    }

    /// Add a header sent with every call (e.g. an auth token).
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, envelope: &Envelope) -> Result<crate::transport::HttpResponse, ClientError> {
        if !self.is_alive() {
            return Err(ClientError::Closed {
                server: self.server.clone(),
            });
        }
        self.executor
            .execute_json(&self.url, &self.headers, envelope, &self.policy)
            .await
            .map_err(|source| {
                if source.is_connection_failure() {
                    self.alive.store(false, Ordering::SeqCst);
                }
                ClientError::Http {
                    server: self.server.clone(),
                    source,
                }
            })
    }
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn request(&self, request: &Request) -> Result<Envelope, ClientError> {
        let response = self.post(&Envelope::Request(request.clone())).await?;

        let body = response.body.into_json().ok_or_else(|| ClientError::InvalidResponse {
            server: self.server.clone(),
            reason: "response body is not JSON".into(),
        })?;
        let envelope = rpc::from_value(body).map_err(|failure| ClientError::InvalidResponse {
            server: self.server.clone(),
            reason: failure.to_string(),
        })?;

        if !envelope.is_response() {
            return Err(ClientError::InvalidResponse {
                server: self.server.clone(),
                reason: "expected a response envelope".into(),
            });
        }
        Ok(envelope)
    }

    async fn notify(&self, notification: &Notification) -> Result<(), ClientError> {
        self.post(&Envelope::Notification(notification.clone()))
            .await
            .map(|_| ())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{RequestId, JSONRPC_VERSION};
    use crate::transport::{
        AttemptFailure, HttpBackend, HttpRequest, RawResponse, StreamingResponse, TransportError,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn request(id: u64, method: &str) -> Request {
        Request {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: None,
            id: RequestId::from(id),
        }
    }

    #[cfg(unix)]
    fn shell(script: &str) -> ServerConfig {
        ServerConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: HashMap::new(),
            cwd: None,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_skips_log_lines_and_unrelated_ids() {
        let script = r#"read line
echo "starting up"
echo '{"jsonrpc":"2.0","id":99,"result":{}}'
echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'
read rest"#;
        let transport = StdioTransport::spawn("echo", &shell(script)).unwrap();

        let envelope = transport.request(&request(1, "ping")).await.unwrap();
        match envelope {
            Envelope::Success(s) => assert_eq!(s.result, json!({"ok": true})),
            other => panic!("expected success, got {other:?}"),
        }
        assert!(transport.is_alive());
        transport.close().await.unwrap();
        assert!(!transport.is_alive());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_eof_marks_transport_dead() {
        let transport = StdioTransport::spawn("quitter", &shell("read line; exit 0")).unwrap();

        let err = transport.request(&request(1, "ping")).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));
        assert!(!transport.is_alive());

        let err = transport.request(&request(2, "ping")).await.unwrap_err();
        assert!(matches!(err, ClientError::Closed { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let config = ServerConfig {
            command: "/nonexistent/toolmesh-test-binary".into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        };
        let result = StdioTransport::spawn("ghost", &config);
        assert!(matches!(result, Err(ClientError::SpawnFailed { .. })));
    }

    struct FixedBackend(Result<(u16, &'static str), ()>);

    #[async_trait]
    impl HttpBackend for FixedBackend {
        async fn do_request(&self, _request: &HttpRequest) -> Result<RawResponse, AttemptFailure> {
            match self.0 {
                Ok((status, body)) => Ok(RawResponse {
                    status,
                    headers: HashMap::new(),
                    body: body.as_bytes().to_vec(),
                }),
                Err(()) => Err(AttemptFailure::Network("refused".into())),
            }
        }

        async fn do_stream(&self, _request: &HttpRequest) -> Result<StreamingResponse, AttemptFailure> {
            Err(AttemptFailure::Network("unsupported".into()))
        }
    }

    fn http(backend: FixedBackend) -> HttpRpcTransport {
        let executor = RequestExecutor::new(Arc::new(backend));
        HttpRpcTransport::new("remote", "http://svc/mcp", executor, RetryPolicy::single_attempt())
    }

    #[tokio::test]
    async fn test_http_decodes_response_envelopes() {
        let transport = http(FixedBackend(Ok((200, r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#))));
        let envelope = transport.request(&request(1, "tools/list")).await.unwrap();
        assert!(matches!(envelope, Envelope::Success(_)));
        assert_eq!(transport.describe(), "http://svc/mcp");
    }

    #[tokio::test]
    async fn test_http_non_envelope_is_invalid_but_alive() {
        let transport = http(FixedBackend(Ok((200, r#"{"hello":"world"}"#))));
        let err = transport.request(&request(1, "tools/list")).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse { .. }));
        assert!(transport.is_alive());
    }

    #[tokio::test]
    async fn test_http_failure_marks_dead() {
        let transport = http(FixedBackend(Err(())));
        let err = transport.request(&request(1, "tools/list")).await.unwrap_err();
        assert!(matches!(err, ClientError::Http { .. }));
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn test_http_notification_accepts_empty_body() {
        let transport = http(FixedBackend(Ok((202, ""))));
        let note = Notification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: "notifications/initialized".into(),
            params: None,
        };
        transport.notify(&note).await.unwrap();
    }

    /// Answers with the queued responses in order.
    struct QueuedBackend(std::sync::Mutex<std::collections::VecDeque<(u16, &'static str)>>);

    #[async_trait]
    impl HttpBackend for QueuedBackend {
        async fn do_request(&self, _request: &HttpRequest) -> Result<RawResponse, AttemptFailure> {
            let next = self.0.lock().unwrap().pop_front();
            let (status, body) = next.ok_or_else(|| AttemptFailure::Network("queue empty".into()))?;
            Ok(RawResponse {
                status,
                headers: HashMap::new(),
                body: body.as_bytes().to_vec(),
            })
        }

        async fn do_stream(&self, _request: &HttpRequest) -> Result<StreamingResponse, AttemptFailure> {
            Err(AttemptFailure::Network("unsupported".into()))
        }
    }

    #[tokio::test]
    async fn test_http_client_fault_keeps_transport_alive() {
        let backend = QueuedBackend(std::sync::Mutex::new(
            [
                (400, r#"{"detail":"unknown tool"}"#),
                (200, r#"{"jsonrpc":"2.0","id":2,"result":{"ok":true}}"#),
            ]
            .into_iter()
            .collect(),
        ));
        let executor = RequestExecutor::new(Arc::new(backend));
        let transport = HttpRpcTransport::new("remote", "http://svc/mcp", executor, RetryPolicy::default());

        let err = transport.request(&request(1, "tools/call")).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Http {
                source: TransportError::ClientFault { status: 400, .. },
                ..
            }
        ));
        assert!(!err.is_transport_failure());
        assert!(transport.is_alive());

        let envelope = transport.request(&request(2, "tools/call")).await.unwrap();
        match envelope {
            Envelope::Success(s) => assert_eq!(s.result, json!({"ok": true})),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
