//! Service-discovery strategies backed by platform tools.
//!
//! - [`DnsSdStrategy`]: the native `dns-sd` browser (macOS, Bonjour for Windows)
//! - [`AvahiStrategy`]: `avahi-browse` from the Avahi project (Linux)
//!
//! Both shell out to a tool that may not be installed. Availability is checked
//! on `PATH` before anything is spawned, the tools are killed when the scan
//! budget runs out, and every failure degrades to an empty result.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;

use super::types::{Endpoint, EndpointSource, ServiceType};

// ─── DiscoveryStrategy ───────────────────────────────────────────────────────

/// One way of finding candidate endpoints.
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this strategy can run on this host at all.
    async fn is_available(&self) -> bool;

    /// Find endpoints for `service` within `timeout`. Never fails.
    async fn discover(&self, service: &ServiceType, timeout: Duration) -> Vec<Endpoint>;
}

// ─── Platform Helpers ────────────────────────────────────────────────────────

/// Resolve an executable name against `PATH`.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let file_name = if cfg!(target_os = "windows") {
        format!("{program}.exe")
    } else {
        program.to_string()
    };
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

/// Run a tool for at most `timeout`, collecting its stdout lines.
///
/// Browsing tools never exit on their own, so hitting the deadline is the
/// normal way out.
async fn collect_output(program: &Path, args: &[&str], timeout: Duration) -> Vec<String> {
    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(program = %program.display(), error = %e, "failed to spawn discovery tool");
            return Vec::new();
        }
    };

    let Some(stdout) = child.stdout.take() else {
        return Vec::new();
    };
    let mut lines = BufReader::new(stdout).lines();
    let deadline = Instant::now() + timeout;
    let mut output = Vec::new();

    loop {
        match tokio::time::timeout_at(deadline, lines.next_line()).await {
            Ok(Ok(Some(line))) => output.push(line),
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                tracing::debug!(program = %program.display(), error = %e, "discovery tool output unreadable");
                break;
            }
            Err(_) => break,
        }
    }

    if let Err(e) = child.kill().await {
        tracing::trace!(program = %program.display(), error = %e, "discovery tool already exited");
    }
    output
}

// ─── dns-sd ──────────────────────────────────────────────────────────────────

/// Native DNS-SD browsing via `dns-sd -B` followed by `dns-sd -L` per instance.
#[derive(Debug, Default)]
pub struct DnsSdStrategy;

const DNS_SD: &str = "dns-sd";

#[async_trait]
impl DiscoveryStrategy for DnsSdStrategy {
    fn name(&self) -> &'static str {
        DNS_SD
    }

    async fn is_available(&self) -> bool {
        find_on_path(DNS_SD).is_some()
    }

    async fn discover(&self, service: &ServiceType, timeout: Duration) -> Vec<Endpoint> {
        let Some(program) = find_on_path(DNS_SD) else {
            return Vec::new();
        };

        // Half the budget browsing, the rest resolving.
        let browse_budget = timeout / 2;
        let resolve_budget = timeout.saturating_sub(browse_budget);

        let browse = collect_output(&program, &["-B", service.as_str()], browse_budget).await;
        let mut instances: Vec<String> = Vec::new();
        for line in &browse {
            if let Some(instance) = parse_dns_sd_browse(line, service) {
                if !instances.contains(&instance) {
                    instances.push(instance);
                }
            }
        }

        let lookups = instances.iter().map(|instance| {
            let program = program.clone();
            async move {
                let args = [
                    "-L",
                    instance.as_str(),
                    service.as_str(),
                    "local.",
                ];
                let output = collect_output(&program, &args, resolve_budget).await;
                output
                    .iter()
                    .find_map(|line| parse_dns_sd_resolve(line))
                    .map(|(host, port)| Endpoint::new(instance.clone(), host, port, EndpointSource::Native))
            }
        });

        futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Instance name from a `dns-sd -B` "Add" line.
///
/// ```text
/// 12:00:00.123  Add        2   4 local.               _mcp._tcp.           Files Server
/// ```
pub(crate) fn parse_dns_sd_browse(line: &str, service: &ServiceType) -> Option<String> {
    let mut fields = line.split_whitespace();
    let _timestamp = fields.next()?;
    if fields.next()? != "Add" {
        return None;
    }
    let needle = format!("{service}.");
    let idx = line.find(&needle)?;
    let name = line[idx + needle.len()..].trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Host and port from a `dns-sd -L` resolution line.
///
/// ```text
/// 12:00:00.456  Files\032Server._mcp._tcp.local. can be reached at host.local.:8080 (interface 4)
/// ```
pub(crate) fn parse_dns_sd_resolve(line: &str) -> Option<(String, u16)> {
    let rest = line.split("can be reached at ").nth(1)?;
    let target = rest.split_whitespace().next()?;
    let (host, port) = target.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host.trim_end_matches('.').to_string(), port))
}

// ─── avahi-browse ────────────────────────────────────────────────────────────

/// Avahi browsing via `avahi-browse -rpt` (resolve, parsable, terminate).
#[derive(Debug, Default)]
pub struct AvahiStrategy;

const AVAHI_BROWSE: &str = "avahi-browse";

#[async_trait]
impl DiscoveryStrategy for AvahiStrategy {
    fn name(&self) -> &'static str {
        AVAHI_BROWSE
    }

    async fn is_available(&self) -> bool {
        find_on_path(AVAHI_BROWSE).is_some()
    }

    async fn discover(&self, service: &ServiceType, timeout: Duration) -> Vec<Endpoint> {
        let Some(program) = find_on_path(AVAHI_BROWSE) else {
            return Vec::new();
        };

        let output = collect_output(&program, &["-rpt", service.as_str()], timeout).await;
        let mut endpoints: Vec<Endpoint> = Vec::new();
        for line in &output {
            let Some((name, host, port)) = parse_avahi_line(line) else {
                continue;
            };
            // Avahi reports each service once per interface.
            if endpoints.iter().any(|e| e.name == name) {
                continue;
            }
            endpoints.push(Endpoint::new(name, host, port, EndpointSource::Community));
        }
        endpoints
    }
}

/// Name, address and port from a resolved (`=`) IPv4 line of `avahi-browse -p`.
///
/// ```text
/// =;eth0;IPv4;Files\032Server;_mcp._tcp;local;host.local;192.168.1.5;8080;"path=/mcp"
/// ```
pub(crate) fn parse_avahi_line(line: &str) -> Option<(String, String, u16)> {
    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() < 9 || fields[0] != "=" || fields[2] != "IPv4" {
        return None;
    }
    let port = fields[8].parse().ok()?;
    Some((unescape_avahi(fields[3]), fields[7].to_string(), port))
}

/// Decode avahi's `\DDD` decimal escapes and `\<char>` escapes.
fn unescape_avahi(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let digits: String = std::iter::from_fn(|| chars.next_if(|c| c.is_ascii_digit()))
            .take(3)
            .collect();
        if digits.len() == 3 {
            if let Some(decoded) = digits.parse::<u32>().ok().and_then(char::from_u32) {
                out.push(decoded);
                continue;
            }
        }
        out.push_str(&digits);
        if digits.is_empty() {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_dns_sd_browse_add_lines() {
        let service = ServiceType::normalize("mcp");
        let add = "12:00:00.123  Add        2   4 local.               _mcp._tcp.           Files Server";
        let rmv = "12:00:01.000  Rmv        0   4 local.               _mcp._tcp.           Files Server";
        let header = "Timestamp     A/R    Flags  if Domain               Service Type         Instance Name";

        assert_eq!(parse_dns_sd_browse(add, &service).as_deref(), Some("Files Server"));
        assert_eq!(parse_dns_sd_browse(rmv, &service), None);
        assert_eq!(parse_dns_sd_browse(header, &service), None);
    }

    #[test]
    fn test_parses_dns_sd_resolution() {
        let line = "12:00:00.456  Files\\032Server._mcp._tcp.local. can be reached at host.local.:8080 (interface 4)";
        assert_eq!(parse_dns_sd_resolve(line), Some(("host.local".to_string(), 8080)));
        assert_eq!(parse_dns_sd_resolve("Lookup Files Server._mcp._tcp.local"), None);
    }

    #[test]
    fn test_parses_resolved_avahi_lines() {
        let line = "=;eth0;IPv4;Files\\032Server;_mcp._tcp;local;host.local;192.168.1.5;8080;\"path=/mcp\"";
        assert_eq!(
            parse_avahi_line(line),
            Some(("Files Server".to_string(), "192.168.1.5".to_string(), 8080))
        );
        // Unresolved and IPv6 entries are skipped.
        assert_eq!(parse_avahi_line("+;eth0;IPv4;Files;_mcp._tcp;local"), None);
        assert_eq!(
            parse_avahi_line("=;eth0;IPv6;Files;_mcp._tcp;local;host.local;fe80::1;8080;"),
            None
        );
    }

    #[test]
    fn test_unescapes_avahi_names() {
        assert_eq!(unescape_avahi("a\\032b"), "a b");
        assert_eq!(unescape_avahi("dots\\.and\\\\slash"), "dots.and\\slash");
        assert_eq!(unescape_avahi("plain"), "plain");
    }

    #[test]
    fn test_missing_tool_is_not_on_path() {
        assert!(find_on_path("definitely-not-a-real-discovery-tool").is_none());
    }
}
