//! `ToolRouter`: many tool clients behind one tool namespace.
//!
//! Writes (`add_client`, `remove_client`, `refresh`, `shutdown`) are
//! serialized by an async writer lock. Each write ends by building a fresh
//! [`Snapshot`] from scratch and swapping it in whole, so readers
//! (`call_tool`, `status`, `tools`) always see a consistent table even while
//! a refresh is in flight.
//!
//! Naming: the first-registered client keeps a tool's bare name; later
//! clients exposing the same name get `<client>_<tool>`. Bare names owned by
//! a removed client, or by one that drops out of a refresh, are retired until
//! the next `add_client`, so they never silently move to another client. A
//! failed owner that lists again on a later refresh takes its name back.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::Mutex;

use super::errors::RouterError;
use super::types::{ClientState, ClientStatus, RouterStatus, ToolDescriptor};
use crate::client::{
    ClientError, HttpRpcTransport, StdioTransport, ToolClient, ToolDefinition, DEFAULT_CALL_TIMEOUT,
};
use crate::config::ServerConfig;
use crate::discovery::Endpoint;
use crate::transport::{RequestExecutor, RetryPolicy};

// ─── Internal State ──────────────────────────────────────────────────────────

/// A registered client, owned by the writer side.
struct ClientEntry {
    name: String,
    client: Arc<ToolClient>,
    state: ClientState,
    endpoint: Option<Endpoint>,
}

/// Everything only writers touch.
#[derive(Default)]
struct WriterState {
    /// Registration order.
    clients: Vec<ClientEntry>,
    /// Bare names that must not be handed to another client, keyed to the
    /// client that last held them.
    retired: HashMap<String, String>,
}

struct Route {
    client: Arc<ToolClient>,
    owner: String,
    tool_name: String,
}

struct ClientView {
    name: String,
    state: ClientState,
    client: Arc<ToolClient>,
    tool_count: usize,
    endpoint: Option<Endpoint>,
}

/// Immutable published view. Replaced wholesale, never patched.
#[derive(Default)]
struct Snapshot {
    routes: HashMap<String, Route>,
    tools: Vec<ToolDescriptor>,
    clients: Vec<ClientView>,
}

// ─── ToolRouter ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ToolRouter {
    writer: Mutex<WriterState>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Client Management ───────────────────────────────────────────────

    /// Register a client and refresh the table.
    ///
    /// Fails only if the name is taken. A client that cannot list its tools
    /// is kept in the `Failed` state.
    pub async fn add_client(&self, name: &str, client: ToolClient) -> Result<(), RouterError> {
        self.add_entry(name, client, None, ClientState::Connecting).await
    }

    /// Connect to an HTTP endpoint, run the handshake and add the client.
    pub async fn connect_endpoint(
        &self,
        endpoint: &Endpoint,
        rpc_path: &str,
        executor: RequestExecutor,
        policy: RetryPolicy,
    ) -> Result<(), RouterError> {
        let url = endpoint.rpc_url(rpc_path);
        let call_timeout = policy
            .worst_case_duration(executor.attempt_timeout())
            .max(DEFAULT_CALL_TIMEOUT);
        let transport = HttpRpcTransport::new(&endpoint.name, &url, executor, policy);
        let client = ToolClient::new(&endpoint.name, transport).with_call_timeout(call_timeout);
        self.connect(&endpoint.name, client, Some(endpoint.clone()))
            .await
    }

    /// Spawn a stdio server, run the handshake and add the client.
    pub async fn connect_stdio(&self, name: &str, config: &ServerConfig) -> Result<(), RouterError> {
        let transport = StdioTransport::spawn(name, config)?;
        self.connect(name, ToolClient::new(name, transport), None)
            .await
    }

    async fn connect(
        &self,
        name: &str,
        client: ToolClient,
        endpoint: Option<Endpoint>,
    ) -> Result<(), RouterError> {
        match client.initialize().await {
            Ok(_) => self.add_entry(name, client, endpoint, ClientState::Connecting).await,
            Err(source) => {
                tracing::warn!(client = name, error = %source, "handshake failed, keeping client as failed");
                if let Err(e) = client.close().await {
                    tracing::debug!(client = name, error = %e, "close after failed handshake");
                }
                self.add_entry(name, client, endpoint, ClientState::Failed).await?;
                Err(RouterError::Handshake {
                    client: name.to_string(),
                    source,
                })
            }
        }
    }

    async fn add_entry(
        &self,
        name: &str,
        client: ToolClient,
        endpoint: Option<Endpoint>,
        state: ClientState,
    ) -> Result<(), RouterError> {
        let mut writer = self.writer.lock().await;
        if writer.clients.iter().any(|c| c.name == name) {
            return Err(RouterError::DuplicateClient {
                name: name.to_string(),
            });
        }

        let mut entry = ClientEntry {
            name: name.to_string(),
            client: Arc::new(client),
            state: ClientState::Disconnected,
            endpoint,
        };
        tracing::debug!(client = name, from = %entry.state, to = %state, "client state change");
        entry.state = state;
        writer.clients.push(entry);

        // A new registration forces re-resolution of retired names.
        writer.retired.clear();

        tracing::info!(client = name, total = writer.clients.len(), "client added");
        self.rebuild(&mut writer).await;
        Ok(())
    }

    /// Close and drop a client, then refresh. Close failures are logged only.
    pub async fn remove_client(&self, name: &str) -> Result<(), RouterError> {
        let mut writer = self.writer.lock().await;
        let idx = writer
            .clients
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| RouterError::UnknownClient {
                name: name.to_string(),
            })?;
        let entry = writer.clients.remove(idx);

        if let Err(e) = entry.client.close().await {
            tracing::warn!(client = name, error = %e, "error closing removed client");
        }

        // Retire the bare names this client held so they cannot be promoted.
        self.retire_bare_names(&mut writer, name);

        tracing::info!(client = name, remaining = writer.clients.len(), "client removed");
        self.rebuild(&mut writer).await;
        Ok(())
    }

    /// Re-list tools on every live client and rebuild the table from scratch.
    pub async fn refresh(&self) {
        let mut writer = self.writer.lock().await;
        self.rebuild(&mut writer).await;
    }

    /// Close every client and clear all tables.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let closing = writer.clients.iter().map(|entry| async move {
            if let Err(e) = entry.client.close().await {
                tracing::warn!(client = %entry.name, error = %e, "error closing client during shutdown");
            }
        });
        futures::future::join_all(closing).await;

        *writer = WriterState::default();
        self.publish(Snapshot::default());
        tracing::info!("router shut down");
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// Route one tool call. The server's result is returned unmodified.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, RouterError> {
        let snapshot = self.current();
        let route = snapshot.routes.get(name).ok_or_else(|| RouterError::NotFound {
            name: name.to_string(),
        })?;

        if !route.client.is_alive() {
            return Err(RouterError::Unavailable {
                tool: name.to_string(),
                client: route.owner.clone(),
            });
        }

        let client = Arc::clone(&route.client);
        let owner = route.owner.clone();
        let tool_name = route.tool_name.clone();
        drop(snapshot);

        tracing::debug!(tool = name, client = %owner, "routing tool call");
        client
            .call_tool(&tool_name, arguments)
            .await
            .map_err(|source| RouterError::Call {
                tool: name.to_string(),
                client: owner,
                source,
            })
    }

    // ─── Read Side ───────────────────────────────────────────────────────

    /// Descriptor for an exposed name.
    pub fn resolve(&self, name: &str) -> Option<ToolDescriptor> {
        self.current()
            .tools
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// Every exposed tool, clients in registration order.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.current().tools.clone()
    }

    pub fn to_openai_tools(&self) -> Vec<Value> {
        self.current()
            .tools
            .iter()
            .map(ToolDescriptor::to_openai_tool)
            .collect()
    }

    /// Endpoints of clients connected through [`Self::connect_endpoint`].
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.current()
            .clients
            .iter()
            .filter_map(|c| c.endpoint.clone())
            .collect()
    }

    pub fn client_names(&self) -> Vec<String> {
        self.current()
            .clients
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Client and tool counts. No side effects.
    pub fn status(&self) -> RouterStatus {
        let snapshot = self.current();
        RouterStatus {
            clients: snapshot
                .clients
                .iter()
                .map(|c| ClientStatus {
                    name: c.name.clone(),
                    state: c.state,
                    alive: c.client.is_alive(),
                    tool_count: c.tool_count,
                    target: c.client.target(),
                })
                .collect(),
            total_tools: snapshot.tools.len(),
        }
    }

    // ─── Rebuild ─────────────────────────────────────────────────────────

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn publish(&self, snapshot: Snapshot) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
    }

    /// List tools on every live client concurrently, then build and publish
    /// a new snapshot. Failing clients are skipped.
    /// Record the bare names `owner` holds in the published table.
    fn retire_bare_names(&self, writer: &mut WriterState, owner: &str) {
        let current = self.current();
        for tool in current.tools.iter().filter(|t| t.owner == owner && !t.is_prefixed()) {
            writer.retired.insert(tool.name.clone(), owner.to_string());
        }
    }

    async fn rebuild(&self, writer: &mut WriterState) {
        let listings = writer.clients.iter().map(|entry| {
            let client = Arc::clone(&entry.client);
            async move {
                if !client.is_alive() {
                    return None;
                }
                Some(client.list_tools().await)
            }
        });
        let results = futures::future::join_all(listings).await;

        let mut listed = HashMap::new();
        let mut skipped = Vec::new();
        for (entry, result) in writer.clients.iter_mut().zip(results) {
            let next = match result {
                None => {
                    skipped.push(entry.name.clone());
                    ClientState::Failed
                }
                Some(Ok(tools)) => {
                    listed.insert(entry.name.clone(), tools);
                    ClientState::Connected
                }
                Some(Err(e)) => {
                    tracing::warn!(client = %entry.name, error = %e, "skipping client during refresh");
                    skipped.push(entry.name.clone());
                    failure_state(entry.state, &e)
                }
            };
            if next != entry.state {
                tracing::debug!(client = %entry.name, from = %entry.state, to = %next, "client state change");
                entry.state = next;
            }
        }
        for name in &skipped {
            self.retire_bare_names(writer, name);
        }

        let snapshot = build_snapshot(&writer.clients, &listed, &writer.retired);
        tracing::info!(
            clients = snapshot.clients.len(),
            tools = snapshot.tools.len(),
            "routing table rebuilt"
        );
        self.publish(snapshot);
    }
}

/// State after a failed listing. A dead connection or a listing that timed
/// out counts as failure.
fn failure_state(current: ClientState, error: &ClientError) -> ClientState {
    if error.is_transport_failure() || matches!(error, ClientError::Timeout { .. }) {
        ClientState::Failed
    } else {
        current
    }
}

/// Derive names and routes from scratch, in registration order.
fn build_snapshot(
    clients: &[ClientEntry],
    listed: &HashMap<String, Vec<ToolDefinition>>,
    retired: &HashMap<String, String>,
) -> Snapshot {
    let mut routes: HashMap<String, Route> = HashMap::new();
    let mut tools = Vec::new();
    let mut views = Vec::with_capacity(clients.len());

    for entry in clients {
        let mut tool_count = 0;
        for tool in listed.get(&entry.name).map(Vec::as_slice).unwrap_or_default() {
            let reserved = retired
                .get(&tool.name)
                .is_some_and(|holder| *holder != entry.name);
            let exposed = if !routes.contains_key(&tool.name) && !reserved {
                tool.name.clone()
            } else {
                let prefixed = format!("{}_{}", entry.name, tool.name);
                if routes.contains_key(&prefixed) {
                    tracing::warn!(
                        client = %entry.name,
                        tool = %tool.name,
                        name = %prefixed,
                        "prefixed tool name already taken, tool not exposed"
                    );
                    continue;
                }
                prefixed
            };

            routes.insert(
                exposed.clone(),
                Route {
                    client: Arc::clone(&entry.client),
                    owner: entry.name.clone(),
                    tool_name: tool.name.clone(),
                },
            );
            tools.push(ToolDescriptor {
                name: exposed,
                tool_name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema.clone(),
                owner: entry.name.clone(),
            });
            tool_count += 1;
        }

        views.push(ClientView {
            name: entry.name.clone(),
            state: entry.state,
            client: Arc::clone(&entry.client),
            tool_count,
            endpoint: entry.endpoint.clone(),
        });
    }

    Snapshot {
        routes,
        tools,
        clients: views,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::client::tests::ScriptedTransport;
    use crate::rpc::{make_error, make_success, ErrorCode};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    /// A client whose tool list can be changed or made to fail, and whose
    /// connection can be cut.
    struct Fake {
        tools: Arc<StdMutex<Vec<&'static str>>>,
        list_fails: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    fn fake_client(name: &'static str, tools: &[&'static str]) -> (ToolClient, Fake) {
        let listed = Arc::new(StdMutex::new(tools.to_vec()));
        let handler_tools = listed.clone();
        let list_fails = Arc::new(AtomicBool::new(false));
        let handler_fails = list_fails.clone();
        let transport = ScriptedTransport::new(move |req| match req.method.as_str() {
            "tools/list" if handler_fails.load(Ordering::SeqCst) => Ok(make_error(
                ErrorCode::InternalError,
                "index unavailable",
                Some(req.id.clone()),
                None,
            )),
            "tools/list" => {
                let tools: Vec<Value> = handler_tools
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|t| json!({"name": t, "description": format!("{t} on {name}")}))
                    .collect();
                Ok(make_success(json!({ "tools": tools }), req.id.clone()))
            }
            "tools/call" => {
                let params = req.params.clone().unwrap_or_default();
                Ok(make_success(
                    json!({"client": name, "tool": params["name"], "args": params["arguments"]}),
                    req.id.clone(),
                ))
            }
            _ => Ok(make_error(ErrorCode::MethodNotFound, "nope", Some(req.id.clone()), None)),
        });
        let closed = transport.closed.clone();
        (
            ToolClient::new(name, transport),
            Fake {
                tools: listed,
                list_fails,
                closed,
            },
        )
    }

    fn broken_client(name: &str) -> ToolClient {
        let server = name.to_string();
        ToolClient::new(
            name,
            ScriptedTransport::new(move |_| {
                Err(ClientError::Transport {
                    server: server.clone(),
                    reason: "pipe closed".into(),
                })
            }),
        )
    }

    async fn router_with(clients: &[(&'static str, &[&'static str])]) -> (ToolRouter, Vec<Fake>) {
        let router = ToolRouter::new();
        let mut fakes = Vec::new();
        for &(name, tools) in clients {
            let (client, fake) = fake_client(name, tools);
            router.add_client(name, client).await.unwrap();
            fakes.push(fake);
        }
        (router, fakes)
    }

    #[tokio::test]
    async fn test_first_registered_client_keeps_bare_name() {
        let (router, _fakes) = router_with(&[("alpha", &["x", "a_only"]), ("beta", &["x"])]).await;

        assert_eq!(router.resolve("x").unwrap().owner, "alpha");
        let prefixed = router.resolve("beta_x").unwrap();
        assert_eq!(prefixed.owner, "beta");
        assert_eq!(prefixed.tool_name, "x");

        let result = router.call_tool("beta_x", json!({"k": 1})).await.unwrap();
        assert_eq!(result, json!({"client": "beta", "tool": "x", "args": {"k": 1}}));
        let result = router.call_tool("x", json!({})).await.unwrap();
        assert_eq!(result["client"], "alpha");
    }

    #[tokio::test]
    async fn test_removing_first_client_does_not_promote_bare_name() {
        let (router, _fakes) = router_with(&[("alpha", &["x", "a_only"]), ("beta", &["x"])]).await;

        router.remove_client("alpha").await.unwrap();
        router.refresh().await;

        assert!(matches!(
            router.call_tool("x", json!({})).await,
            Err(RouterError::NotFound { .. })
        ));
        assert!(matches!(
            router.call_tool("a_only", json!({})).await,
            Err(RouterError::NotFound { .. })
        ));
        let result = router.call_tool("beta_x", json!({})).await.unwrap();
        assert_eq!(result["client"], "beta");
    }

    #[tokio::test]
    async fn test_new_registration_re_resolves_retired_names() {
        let (router, _fakes) = router_with(&[("alpha", &["x"]), ("beta", &["x"])]).await;
        router.remove_client("alpha").await.unwrap();
        assert!(router.resolve("x").is_none());

        let (gamma, _g) = fake_client("gamma", &["x"]);
        router.add_client("gamma", gamma).await.unwrap();

        assert_eq!(router.resolve("x").unwrap().owner, "beta");
        assert_eq!(router.resolve("gamma_x").unwrap().owner, "gamma");
        assert!(router.resolve("beta_x").is_none());
    }

    #[tokio::test]
    async fn test_refresh_rebuilds_from_scratch() {
        let (router, fakes) = router_with(&[("alpha", &["old"])]).await;
        assert!(router.resolve("old").is_some());

        *fakes[0].tools.lock().unwrap() = vec!["new"];
        router.refresh().await;

        assert!(router.resolve("old").is_none());
        assert_eq!(router.resolve("new").unwrap().owner, "alpha");
    }

    #[tokio::test]
    async fn test_broken_client_does_not_block_healthy_ones() {
        let router = ToolRouter::new();
        router.add_client("broken", broken_client("broken")).await.unwrap();
        let (healthy, _fake) = fake_client("healthy", &["ping"]);
        router.add_client("healthy", healthy).await.unwrap();

        assert_eq!(router.tools().len(), 1);
        assert_eq!(router.call_tool("ping", json!({})).await.unwrap()["client"], "healthy");

        let status = router.status();
        assert_eq!(status.clients[0].state, ClientState::Failed);
        assert!(!status.clients[0].alive);
        assert_eq!(status.clients[1].state, ClientState::Connected);
        assert_eq!(status.connected_clients(), 1);
    }

    #[tokio::test]
    async fn test_dead_owner_is_unavailable_without_rebuilding() {
        let (router, fakes) = router_with(&[("alpha", &["x"])]).await;

        fakes[0].closed.store(true, Ordering::SeqCst);
        match router.call_tool("x", json!({})).await {
            Err(RouterError::Unavailable { tool, client }) => {
                assert_eq!(tool, "x");
                assert_eq!(client, "alpha");
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
        // Routing faults leave the table alone until the next refresh.
        assert!(router.resolve("x").is_some());

        router.refresh().await;
        assert!(router.resolve("x").is_none());
        assert_eq!(router.status().clients[0].state, ClientState::Failed);
    }

    #[tokio::test]
    async fn test_dead_owner_bare_name_is_not_promoted_on_refresh() {
        let (router, fakes) = router_with(&[("alpha", &["x"]), ("beta", &["x"])]).await;

        fakes[0].closed.store(true, Ordering::SeqCst);
        router.refresh().await;

        assert!(matches!(
            router.call_tool("x", json!({})).await,
            Err(RouterError::NotFound { .. })
        ));
        let result = router.call_tool("beta_x", json!({})).await.unwrap();
        assert_eq!(result["client"], "beta");
        assert!(router.resolve("x").is_none());
    }

    #[tokio::test]
    async fn test_owner_with_failing_listing_gets_its_name_back() {
        let (router, fakes) = router_with(&[("alpha", &["x"]), ("beta", &["x"])]).await;

        fakes[0].list_fails.store(true, Ordering::SeqCst);
        router.refresh().await;
        assert!(router.resolve("x").is_none());
        assert_eq!(router.resolve("beta_x").unwrap().owner, "beta");
        assert!(router.status().clients[0].alive);

        fakes[0].list_fails.store(false, Ordering::SeqCst);
        router.refresh().await;
        assert_eq!(router.resolve("x").unwrap().owner, "alpha");
        assert_eq!(router.resolve("beta_x").unwrap().owner, "beta");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_call_leaves_client_routable() {
        /// Lists two tools and never answers calls to `long_job`.
        struct Stalling;

        #[async_trait::async_trait]
        impl crate::client::RpcTransport for Stalling {
            fn describe(&self) -> String {
                "stalling".into()
            }
            async fn request(&self, request: &crate::rpc::Request) -> Result<crate::rpc::Envelope, ClientError> {
                let result = match request.method.as_str() {
                    "tools/list" => json!({"tools": [{"name": "long_job"}, {"name": "quick"}]}),
                    _ => {
                        let name = request.params.as_ref().and_then(|p| p["name"].as_str());
                        if name == Some("long_job") {
                            futures::future::pending::<()>().await;
                        }
                        json!({"content": [{"type": "text", "text": "done"}]})
                    }
                };
                Ok(make_success(result, request.id.clone()))
            }
            async fn notify(&self, _notification: &crate::rpc::Notification) -> Result<(), ClientError> {
                Ok(())
            }
            fn is_alive(&self) -> bool {
                true
            }
            async fn close(&self) -> Result<(), ClientError> {
                Ok(())
            }
        }

        let router = ToolRouter::new();
        let client = ToolClient::new("worker", Stalling).with_call_timeout(std::time::Duration::from_secs(2));
        router.add_client("worker", client).await.unwrap();

        let err = router.call_tool("long_job", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::Call {
                source: ClientError::Timeout { .. },
                ..
            }
        ));
        assert!(router.status().clients[0].alive);

        let result = router.call_tool("quick", json!({})).await.unwrap();
        assert_eq!(result["content"][0]["text"], "done");

        router.refresh().await;
        assert_eq!(router.status().clients[0].state, ClientState::Connected);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let (router, _fakes) = router_with(&[("alpha", &["x"])]).await;
        let err = router.call_tool("y", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown tool: 'y'");
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_client_names() {
        let (router, _fakes) = router_with(&[("alpha", &["x"])]).await;
        let (again, _f) = fake_client("alpha", &["y"]);

        assert!(matches!(
            router.add_client("alpha", again).await,
            Err(RouterError::DuplicateClient { .. })
        ));
        assert!(matches!(
            router.remove_client("ghost").await,
            Err(RouterError::UnknownClient { .. })
        ));
        assert!(router.resolve("y").is_none());
    }

    #[tokio::test]
    async fn test_taken_prefixed_name_is_skipped_not_overwritten() {
        let (router, _fakes) = router_with(&[("alpha", &["x", "beta_x"]), ("beta", &["x"])]).await;

        let tools = router.tools();
        assert_eq!(tools.len(), 2);
        assert_eq!(router.resolve("beta_x").unwrap().owner, "alpha");
    }

    #[tokio::test]
    async fn test_status_counts_and_openai_export() {
        let (router, _fakes) = router_with(&[("alpha", &["x", "y"]), ("beta", &["x"])]).await;

        let status = router.status();
        assert_eq!(status.total_clients(), 2);
        assert_eq!(status.total_tools, 3);
        assert_eq!(status.clients[0].tool_count, 2);
        assert_eq!(status.clients[1].tool_count, 1);
        assert_eq!(status.clients[0].target, "scripted");

        let exported = router.to_openai_tools();
        assert_eq!(exported.len(), 3);
        assert_eq!(exported[2]["type"], "function");
        assert_eq!(exported[2]["function"]["name"], "beta_x");
        assert_eq!(exported[2]["function"]["description"], "x on beta");
        // Status is a pure read.
        assert_eq!(router.status(), status);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (router, fakes) = router_with(&[("alpha", &["x"]), ("beta", &["y"])]).await;
        router.shutdown().await;

        assert!(fakes.iter().all(|f| f.closed.load(Ordering::SeqCst)));
        assert!(router.tools().is_empty());
        assert_eq!(router.status().total_clients(), 0);
    }

    #[tokio::test]
    async fn test_call_errors_are_scoped_to_the_call() {
        let transport = ScriptedTransport::new(|req| match req.method.as_str() {
            "tools/list" => Ok(make_success(json!({"tools": [{"name": "fails"}]}), req.id.clone())),
            _ => Ok(make_error(ErrorCode::InternalError, "boom", Some(req.id.clone()), None)),
        });
        let router = ToolRouter::new();
        router
            .add_client("alpha", ToolClient::new("alpha", transport))
            .await
            .unwrap();

        let err = router.call_tool("fails", json!({})).await.unwrap_err();
        assert!(matches!(err, RouterError::Call { .. }));
        assert!(router.status().clients[0].alive);
        assert!(router.resolve("fails").is_some());
    }

    #[tokio::test]
    async fn test_failed_handshake_is_reported_and_kept_as_failed() {
        let transport = ScriptedTransport::new(|req| {
            Ok(make_error(ErrorCode::InvalidRequest, "unsupported version", Some(req.id.clone()), None))
        });
        let router = ToolRouter::new();
        let err = router
            .connect("legacy", ToolClient::new("legacy", transport), None)
            .await
            .unwrap_err();

        assert!(matches!(err, RouterError::Handshake { .. }));
        let status = router.status();
        assert_eq!(status.clients[0].name, "legacy");
        assert_eq!(status.clients[0].state, ClientState::Failed);
    }
}
