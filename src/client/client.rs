//! `ToolClient`: one live connection to a tool server.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::errors::ClientError;
use super::transport::RpcTransport;
use super::types::{
    Implementation, InitializeParams, InitializeResult, ResourceDefinition, ResourceListPage,
    ToolDefinition, ToolListPage,
};
use crate::discovery::Capabilities;
use crate::rpc::{methods, Envelope, Notification, Request, RequestId, JSONRPC_VERSION};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default timeout for a single call. Covers the default HTTP retry budget
/// (three 30 s attempts plus backoff).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Safety cap on `nextCursor` pagination.
const MAX_LIST_PAGES: usize = 100;

// ─── ToolClient ──────────────────────────────────────────────────────────────

/// A connection to one tool server.
///
/// Request ids are a per-client counter. A transport failure marks the
/// client dead for good; an RPC error response or a call timeout does not.
pub struct ToolClient {
    name: String,
    transport: Box<dyn RpcTransport>,
    next_id: AtomicU64,
    alive: AtomicBool,
    handshake: RwLock<Option<InitializeResult>>,
    call_timeout: Duration,
}

impl ToolClient {
    pub fn new(name: &str, transport: impl RpcTransport + 'static) -> Self {
        Self::from_boxed(name, Box::new(transport))
    }

    pub fn from_boxed(name: &str, transport: Box<dyn RpcTransport>) -> Self {
        Self {
            name: name.to_string(),
            transport,
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            handshake: RwLock::new(None),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport target, for logs and status output.
    pub fn target(&self) -> String {
        self.transport.describe()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.transport.is_alive()
    }

    /// Server identity from the handshake, if it ran.
    pub fn server_info(&self) -> Option<Implementation> {
        self.handshake
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|h| h.server_info.clone())
    }

    /// Capability names from the handshake. Empty before `initialize`.
    pub fn capabilities(&self) -> Capabilities {
        self.handshake
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|h| Capabilities::from_server_object(&h.capabilities))
            .unwrap_or_default()
    }

    // ─── Protocol ────────────────────────────────────────────────────────

    /// Run the `initialize` handshake and send `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult, ClientError> {
        let params = serde_json::to_value(InitializeParams::default()).map_err(|e| {
            ClientError::InitFailed {
                name: self.name.clone(),
                reason: format!("failed to encode params: {e}"),
            }
        })?;

        let result: InitializeResult = self
            .call_typed(methods::INITIALIZE, Some(params))
            .await
            .map_err(|e| match e {
                ClientError::InvalidResponse { reason, .. } => ClientError::InitFailed {
                    name: self.name.clone(),
                    reason,
                },
                other => other,
            })?;

        self.notify(methods::INITIALIZED, None).await?;

        tracing::info!(
            server = %self.name,
            target = %self.transport.describe(),
            protocol = result.protocol_version.as_deref().unwrap_or("unknown"),
            server_name = result.server_info.as_ref().map(|i| i.name.as_str()).unwrap_or("unknown"),
            "server initialized"
        );

        *self.handshake.write().unwrap_or_else(|e| e.into_inner()) = Some(result.clone());
        Ok(result)
    }

    /// Fetch the server's full tool list, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ClientError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ToolListPage = self.call_typed(methods::TOOLS_LIST, params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_ref() != Some(&next) => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(server = %self.name, pages = MAX_LIST_PAGES, "tools/list pagination cap reached");
        Ok(tools)
    }

    /// Invoke a tool. The result is returned exactly as the server sent it.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        let params = json!({ "name": name, "arguments": arguments });
        self.call(methods::TOOLS_CALL, Some(params)).await
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDefinition>, ClientError> {
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ResourceListPage = self.call_typed(methods::RESOURCES_LIST, params).await?;
            resources.extend(page.resources);
            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_ref() != Some(&next) => cursor = Some(next),
                _ => return Ok(resources),
            }
        }
        Ok(resources)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Value, ClientError> {
        self.call(methods::RESOURCES_READ, Some(json!({ "uri": uri })))
            .await
    }

    /// Close the transport. The client is dead afterwards.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.alive.store(false, Ordering::SeqCst);
        self.transport.close().await
    }

    // ─── Plumbing ────────────────────────────────────────────────────────

    async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let result = self.call(method, params).await?;
        serde_json::from_value(result).map_err(|e| ClientError::InvalidResponse {
            server: self.name.clone(),
            reason: format!("unexpected '{method}' result: {e}"),
        })
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        if !self.is_alive() {
            return Err(ClientError::Closed {
                server: self.name.clone(),
            });
        }

        let request = Request {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: RequestId::from(self.next_id.fetch_add(1, Ordering::Relaxed)),
        };

        let outcome = match tokio::time::timeout(self.call_timeout, self.transport.request(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::Timeout {
                server: self.name.clone(),
                method: method.to_string(),
                timeout_ms: self.call_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(Envelope::Success(success)) => Ok(success.result),
            Ok(Envelope::Error(err)) => Err(ClientError::Rpc {
                server: self.name.clone(),
                code: err.error.code,
                message: err.error.message,
                data: err.error.data,
            }),
            Ok(other) => Err(ClientError::InvalidResponse {
                server: self.name.clone(),
                reason: format!("expected a response to '{method}', got {other:?}"),
            }),
            Err(e) => {
                if e.is_transport_failure() {
                    self.alive.store(false, Ordering::SeqCst);
                    tracing::warn!(server = %self.name, method, error = %e, "transport failure, client marked dead");
                }
                Err(e)
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        let notification = Notification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        };
        self.transport.notify(&notification).await.inspect_err(|e| {
            if e.is_transport_failure() {
                self.alive.store(false, Ordering::SeqCst);
            }
        })
    }
}

impl std::fmt::Debug for ToolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolClient")
            .field("name", &self.name)
            .field("target", &self.transport.describe())
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
