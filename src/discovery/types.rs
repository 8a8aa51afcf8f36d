//! Discovery data types.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── TransportKind ───────────────────────────────────────────────────────────

/// How a discovered endpoint is spoken to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    Https,
}

impl TransportKind {
    pub fn scheme(&self) -> &'static str {
        match self {
            TransportKind::Http => "http",
            TransportKind::Https => "https",
        }
    }
}

/// Which mechanism produced an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointSource {
    /// Platform-native service discovery (`dns-sd`).
    Native,
    /// Community service discovery (`avahi-browse`).
    Community,
    /// TCP connect probe of localhost ports.
    PortProbe,
    /// Explicit registration.
    Manual,
}

// ─── Endpoint ────────────────────────────────────────────────────────────────

/// A candidate backend address. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    pub source: EndpointSource,
    pub discovered_at: DateTime<Utc>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16, source: EndpointSource) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            transport: TransportKind::Http,
            source,
            discovered_at: Utc::now(),
        }
    }

    /// Base url, e.g. `http://127.0.0.1:8080`.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.transport.scheme(), self.host, self.port)
    }

    /// Url of the JSON-RPC path on this endpoint.
    pub fn rpc_url(&self, rpc_path: &str) -> String {
        join_url(&self.base_url(), rpc_path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.host, self.port)
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

// ─── Capabilities ────────────────────────────────────────────────────────────

/// Capability names a backend advertises (`tools`, `resources`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<String>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys of a server's `capabilities` object. Non-objects yield an empty set.
    pub fn from_server_object(value: &serde_json::Value) -> Self {
        value
            .as_object()
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromIterator<String> for Capabilities {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for Capabilities {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(str::to_string).collect())
    }
}

/// A manually registered endpoint and what it was registered with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredEndpoint {
    pub endpoint: Endpoint,
    pub capabilities: Capabilities,
}

// ─── ServiceType ─────────────────────────────────────────────────────────────

/// A DNS-SD service type in `_<name>._<proto>` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceType(String);

impl ServiceType {
    /// Normalize `mcp`, `_mcp`, `mcp._tcp` or `_mcp._tcp.` to `_mcp._tcp`.
    pub fn normalize(service_id: &str) -> Self {
        let trimmed = service_id.trim().trim_end_matches('.');
        let (name, proto) = if let Some(name) = trimmed.strip_suffix("._udp") {
            (name, "udp")
        } else if let Some(name) = trimmed.strip_suffix("._tcp") {
            (name, "tcp")
        } else {
            (trimmed, "tcp")
        };
        Self(format!("_{}._{proto}", name.trim_start_matches('_')))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
