//! Relay configuration loading and validation.
//!
//! Reads `toolmesh.yaml` and resolves environment variables. Every section is
//! optional; a missing file yields the defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::discovery::probe::DEFAULT_PROBE_PORTS;
use crate::discovery::DEFAULT_RPC_PATH;
use crate::transport::{RetryPolicy, DEFAULT_BREAKER_THRESHOLD};

// ─── Constants ───────────────────────────────────────────────────────────────

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "toolmesh.yaml";

/// Env var pointing at a config file.
pub const CONFIG_ENV_VAR: &str = "TOOLMESH_CONFIG";

/// Filter used when neither `RUST_LOG` nor `logging.filter` is set.
pub const DEFAULT_LOG_FILTER: &str = "toolmesh=info,warn";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Sections ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

/// HTTP timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_ms: u64,
    /// Hard cap on one request attempt.
    pub attempt_timeout_ms: u64,
    /// Overall cap on a streaming response.
    pub stream_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            attempt_timeout_ms: 30_000,
            stream_timeout_ms: 180_000,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Consecutive undecodable events before the stream is aborted.
    pub breaker_threshold: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
        }
    }
}

/// An endpoint registered by hand instead of discovered.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManualEndpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Bare service id, normalized to `_<id>._tcp` at scan time.
    pub service_id: String,
    pub scan_timeout_ms: u64,
    /// Localhost ports tried by the fallback probe.
    pub probe_ports: Vec<u16>,
    /// Path JSON-RPC is POSTed to on discovered endpoints.
    pub rpc_path: String,
    pub endpoints: Vec<ManualEndpoint>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_id: "mcp".into(),
            scan_timeout_ms: 2_000,
            probe_ports: DEFAULT_PROBE_PORTS.to_vec(),
            rpc_path: DEFAULT_RPC_PATH.into(),
            endpoints: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

/// A tool server spawned as a child process speaking JSON-RPC over stdio.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives. `RUST_LOG` wins when set.
    pub filter: Option<String>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn filter_directives(&self) -> &str {
        self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}

// ─── RelayConfig ─────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `toolmesh.yaml`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub retry: RetryConfig,
    pub http: HttpConfig,
    pub stream: StreamConfig,
    pub discovery: DiscoveryConfig,
    /// Stdio servers by client name.
    pub servers: HashMap<String, ServerConfig>,
    pub logging: LoggingConfig,
}

impl RelayConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    /// Check value ranges serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts < 1 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier < 1.0 {
            return Err(invalid("retry.backoff_multiplier must be at least 1.0"));
        }
        if self.stream.breaker_threshold < 1 {
            return Err(invalid("stream.breaker_threshold must be at least 1"));
        }
        if self.http.attempt_timeout_ms == 0 {
            return Err(invalid("http.attempt_timeout_ms must be positive"));
        }
        for (name, server) in &self.servers {
            if server.command.trim().is_empty() {
                return Err(invalid(&format!("servers.{name}.command is empty")));
            }
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_string(),
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Outcome of looking for the config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigLocation {
    /// File to load; `None` means built-in defaults.
    pub path: Option<PathBuf>,
    /// Value of `TOOLMESH_CONFIG` when it named a missing file.
    pub missing_env_path: Option<PathBuf>,
}

impl ConfigLocation {
    /// Read the located file, or return the defaults when there is none.
    ///
    /// Does not log, so it can run before the subscriber is installed.
    pub fn load(&self) -> Result<RelayConfig, ConfigError> {
        match &self.path {
            Some(path) => load_config_file(path),
            None => Ok(RelayConfig::default()),
        }
    }

    /// Report how the configuration was found.
    pub fn log(&self, config: &RelayConfig) {
        if let Some(path) = &self.missing_env_path {
            tracing::warn!(path = %path.display(), "{CONFIG_ENV_VAR} points at a missing file");
        }
        match &self.path {
            Some(path) => {
                tracing::info!(path = %path.display(), servers = config.servers.len(), "config loaded")
            }
            None => tracing::debug!("no {CONFIG_FILE_NAME} found, using defaults"),
        }
    }
}

/// Decide which config file to use.
///
/// An explicit path always wins. Otherwise `TOOLMESH_CONFIG` is checked, then
/// `toolmesh.yaml` is searched for upward from `start`.
pub fn locate_config(explicit: Option<&Path>, start: &Path) -> ConfigLocation {
    if let Some(path) = explicit {
        return ConfigLocation {
            path: Some(path.to_path_buf()),
            missing_env_path: None,
        };
    }

    let mut location = ConfigLocation::default();
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            location.path = Some(candidate);
            return location;
        }
        location.missing_env_path = Some(candidate);
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            location.path = Some(candidate);
            return location;
        }
        if !dir.pop() {
            return location;
        }
    }
}

/// Locate the config file without an explicit path.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    locate_config(None, start).path
}

/// Load the configuration and log where it came from.
///
/// An explicit path must exist. Without one the file is looked up with
/// [`locate_config`] from the working directory, and defaults are used if
/// nothing is found. Callers that install tracing from the result should use
/// [`locate_config`] and [`ConfigLocation::load`] and log afterwards.
pub fn load_config(explicit: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let location = locate_config(explicit, &cwd);
    let config = location.load()?;
    location.log(&config);
    Ok(config)
}

/// Parse, interpolate and validate one config file.
pub fn load_config_file(path: &Path) -> Result<RelayConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    parse_config(&raw).map_err(|e| match e {
        ConfigError::Parse { reason, .. } => ConfigError::Parse {
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })
}

/// Parse config text. An empty document yields the defaults.
pub fn parse_config(raw: &str) -> Result<RelayConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);

    let mut config: RelayConfig = if interpolated.trim().is_empty() {
        RelayConfig::default()
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            path: "<inline>".into(),
            reason: e.to_string(),
        })?
    };

    for server in config.servers.values_mut() {
        server.command = expand_tilde(&server.command);
        if let Some(cwd) = server.cwd.as_mut() {
            *cwd = expand_tilde(cwd);
        }
    }

    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
///
/// An unterminated `${` is kept literally.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                result.push_str(&resolve_var_expr(&after[..end]));
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

/// Resolve `VAR` or `VAR:-default`. Unset without a default is empty.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => match std::env::var(name) {
            Ok(value) if !value.is_empty() => value,
            _ => expand_tilde(default),
        },
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{}", home.display(), &path[1..]);
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
