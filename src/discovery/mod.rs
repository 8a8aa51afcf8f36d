//! Endpoint discovery.
//!
//! Locates candidate tool-server addresses. Strategies are tried in priority
//! order and the first one available on this host is used (no merging):
//!
//! 1. [`DnsSdStrategy`]: native `dns-sd`
//! 2. [`AvahiStrategy`]: `avahi-browse`
//! 3. [`PortProbeStrategy`]: TCP connect to a fixed list of localhost ports
//!
//! Endpoints can also be registered by hand. Nothing in this module returns
//! an error: missing tools, closed ports and unresponsive servers all degrade
//! to empty results and a log line.

pub mod probe;
pub mod strategies;
pub mod types;

pub use probe::{PortProbeStrategy, DEFAULT_PROBE_HOST, DEFAULT_PROBE_PORTS};
pub use strategies::{find_on_path, AvahiStrategy, DiscoveryStrategy, DnsSdStrategy};
pub use types::{Capabilities, Endpoint, EndpointSource, RegisteredEndpoint, ServiceType, TransportKind};

use std::sync::RwLock;
use std::time::Duration;

use crate::client::types::InitializeParams;
use crate::config::DiscoveryConfig;
use crate::rpc::{self, methods, Envelope, RequestId};
use crate::transport::{RequestExecutor, RetryPolicy};

/// Default JSON-RPC path on discovered HTTP endpoints.
pub const DEFAULT_RPC_PATH: &str = "/mcp";

/// Upper bound on a capability query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Extra time a strategy gets past the scan budget to tear down its tools.
const SCAN_GRACE: Duration = Duration::from_millis(500);

// ─── EndpointDiscovery ───────────────────────────────────────────────────────

/// Discovery service: strategy chain, manual registry and capability query.
pub struct EndpointDiscovery {
    strategies: Vec<Box<dyn DiscoveryStrategy>>,
    registry: RwLock<Vec<RegisteredEndpoint>>,
    executor: RequestExecutor,
    rpc_path: String,
    query_timeout: Duration,
}

impl EndpointDiscovery {
    /// Default strategy chain probing [`DEFAULT_PROBE_PORTS`].
    pub fn new(executor: RequestExecutor) -> Self {
        Self {
            strategies: default_strategies(PortProbeStrategy::default()),
            registry: RwLock::new(Vec::new()),
            executor,
            rpc_path: DEFAULT_RPC_PATH.to_string(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Build from config, pre-registering its manual endpoints.
    pub fn from_config(config: &DiscoveryConfig, executor: RequestExecutor) -> Self {
        let probe = PortProbeStrategy::new(DEFAULT_PROBE_HOST, config.probe_ports.clone());
        let discovery = Self::new(executor)
            .with_strategies(default_strategies(probe))
            .with_rpc_path(&config.rpc_path);
        for manual in &config.endpoints {
            let capabilities = manual.capabilities.iter().cloned().collect();
            discovery.register(&manual.name, &manual.host, manual.port, Some(capabilities));
        }
        discovery
    }

    /// Replace the strategy chain. Order is priority.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn DiscoveryStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_rpc_path(mut self, rpc_path: &str) -> Self {
        self.rpc_path = rpc_path.to_string();
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn rpc_path(&self) -> &str {
        &self.rpc_path
    }

    /// Find endpoints for `service_id` using the first available strategy.
    pub async fn scan(&self, timeout: Duration, service_id: &str) -> Vec<Endpoint> {
        let service = ServiceType::normalize(service_id);

        for strategy in &self.strategies {
            if !strategy.is_available().await {
                tracing::debug!(strategy = strategy.name(), "discovery strategy unavailable");
                continue;
            }

            let found = match tokio::time::timeout(timeout + SCAN_GRACE, strategy.discover(&service, timeout)).await {
                Ok(found) => found,
                Err(_) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        service = %service,
                        timeout_ms = timeout.as_millis() as u64,
                        "discovery scan overran its budget"
                    );
                    Vec::new()
                }
            };
            tracing::info!(
                strategy = strategy.name(),
                service = %service,
                found = found.len(),
                "discovery scan complete"
            );
            return found;
        }

        tracing::warn!(service = %service, "no discovery strategy available");
        Vec::new()
    }

    /// Register an endpoint by hand. Replaces an earlier one with the same name.
    pub fn register(
        &self,
        name: &str,
        host: &str,
        port: u16,
        capabilities: Option<Capabilities>,
    ) -> Endpoint {
        let endpoint = Endpoint::new(name, host, port, EndpointSource::Manual);
        let entry = RegisteredEndpoint {
            endpoint: endpoint.clone(),
            capabilities: capabilities.unwrap_or_default(),
        };

        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        match registry.iter_mut().find(|r| r.endpoint.name == name) {
            Some(existing) => *existing = entry,
            None => registry.push(entry),
        }
        tracing::info!(name, host, port, "endpoint registered");
        endpoint
    }

    /// Manually registered endpoints, in registration order.
    pub fn registered(&self) -> Vec<RegisteredEndpoint> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn unregister(&self, name: &str) -> Option<RegisteredEndpoint> {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let idx = registry.iter().position(|r| r.endpoint.name == name)?;
        Some(registry.remove(idx))
    }

    /// Ask a server what it supports via one `initialize` call.
    ///
    /// Best-effort: any failure or timeout yields an empty set.
    pub async fn query_capabilities(&self, host: &str, port: u16) -> Capabilities {
        let url = types::join_url(&format!("http://{host}:{port}"), &self.rpc_path);

        let params = match serde_json::to_value(InitializeParams::default()) {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode initialize params");
                return Capabilities::new();
            }
        };
        let envelope = rpc::make_request(methods::INITIALIZE, Some(params), Some(RequestId::from(1u64)));

        let executor = self.executor.clone().with_attempt_timeout(self.query_timeout);
        let policy = RetryPolicy::single_attempt();
        let call = executor.execute_json(&url, &[], &envelope, &policy);
        let response = match tokio::time::timeout(self.query_timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::debug!(%url, error = %e, "capability query failed");
                return Capabilities::new();
            }
            Err(_) => {
                tracing::debug!(%url, "capability query timed out");
                return Capabilities::new();
            }
        };

        let Some(body) = response.body.into_json() else {
            tracing::debug!(%url, "capability query returned a non-JSON body");
            return Capabilities::new();
        };
        match rpc::from_value(body) {
            Ok(Envelope::Success(success)) => {
                let capabilities = Capabilities::from_server_object(&success.result["capabilities"]);
                tracing::debug!(%url, count = capabilities.len(), "capabilities queried");
                capabilities
            }
            Ok(Envelope::Error(err)) => {
                tracing::debug!(%url, code = err.error.code, message = %err.error.message, "capability query rejected");
                Capabilities::new()
            }
            Ok(_) => Capabilities::new(),
            Err(failure) => {
                tracing::debug!(%url, error = %failure, "capability query returned an invalid envelope");
                Capabilities::new()
            }
        }
    }
}

fn default_strategies(probe: PortProbeStrategy) -> Vec<Box<dyn DiscoveryStrategy>> {
    vec![
        Box::new(DnsSdStrategy),
        Box::new(AvahiStrategy),
        Box::new(probe),
    ]
}

// ─── Tests ───────────────────────────────────────────────────────────────────
