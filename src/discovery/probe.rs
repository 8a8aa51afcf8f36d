//! Localhost port probe, the discovery strategy of last resort.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::strategies::DiscoveryStrategy;
use super::types::{Endpoint, EndpointSource, ServiceType};

/// Ports probed when none are configured.
pub const DEFAULT_PROBE_PORTS: &[u16] = &[3000, 8000, 8080, 8765];

/// Host probed by default.
pub const DEFAULT_PROBE_HOST: &str = "127.0.0.1";

/// TCP-connects to a fixed list of ports. Always available.
#[derive(Debug, Clone)]
pub struct PortProbeStrategy {
    host: String,
    ports: Vec<u16>,
}

impl Default for PortProbeStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_HOST, DEFAULT_PROBE_PORTS.to_vec())
    }
}

impl PortProbeStrategy {
    pub fn new(host: impl Into<String>, ports: Vec<u16>) -> Self {
        Self {
            host: host.into(),
            ports,
        }
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    async fn probe(&self, port: u16, timeout: Duration) -> Option<Endpoint> {
        let addr = format!("{}:{port}", self.host);
        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => {
                tracing::debug!(%addr, "port probe hit");
                Some(Endpoint::new(
                    format!("localhost:{port}"),
                    self.host.clone(),
                    port,
                    EndpointSource::PortProbe,
                ))
            }
            Ok(Err(e)) => {
                tracing::trace!(%addr, error = %e, "port closed");
                None
            }
            Err(_) => {
                tracing::trace!(%addr, "port probe timed out");
                None
            }
        }
    }
}

#[async_trait]
impl DiscoveryStrategy for PortProbeStrategy {
    fn name(&self) -> &'static str {
        "port-probe"
    }

    async fn is_available(&self) -> bool {
        true
    }

    /// Probes every port concurrently; results keep the configured port order.
    async fn discover(&self, _service: &ServiceType, timeout: Duration) -> Vec<Endpoint> {
        let probes = self.ports.iter().map(|&port| self.probe(port, timeout));
        futures::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
