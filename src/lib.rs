//! toolmesh: resilient transport core for LLM tool agents.
//!
//! - [`rpc`]: JSON-RPC 2.0 envelopes and their codec
//! - [`transport`]: HTTP execution with retries, JSON repair and SSE streaming
//! - [`discovery`]: endpoint discovery and manual registration
//! - [`client`]: one JSON-RPC connection to one tool server
//! - [`router`]: one tool namespace over many clients
//! - [`config`]: `toolmesh.yaml` loading

pub mod client;
pub mod config;
pub mod discovery;
pub mod router;
pub mod rpc;
pub mod transport;

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use client::{ClientError, ToolClient};
pub use config::{load_config, locate_config, ConfigError, ConfigLocation, LoggingConfig, RelayConfig};
pub use discovery::{Endpoint, EndpointDiscovery};
pub use router::{RouterError, ToolRouter};
pub use transport::{RequestExecutor, RetryPolicy, StreamExecutor, TransportError};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `logging.filter`. Logs go to stderr unless
/// `logging.file` is set, in which case they are appended to that file and
/// flushed per line. A second call leaves the first subscriber in place.
pub fn init_tracing(config: &LoggingConfig) -> std::io::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));
    let builder = fmt::fmt().with_env_filter(filter).with_target(true);

    let installed = match &config.file {
        Some(path) => {
            let writer = FlushingWriter::open(path)?;
            let builder = builder.with_writer(writer).with_ansi(false);
            if config.json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
        None if config.json => builder.with_writer(std::io::stderr).json().try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(
            version = env!("CARGO_PKG_VERSION"),
            json = config.json,
            file = ?config.file,
            "tracing initialized"
        );
    }
    Ok(())
}

/// Appending file writer that flushes after every write, so log lines
/// survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let n = file.write(buf)?;
        file.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.lock().unwrap_or_else(|e| e.into_inner()).flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
