//! Command-line front end for the toolmesh transport core.
//!
//! # Examples
//!
//! ```sh
//! # Find tool servers on the local network (or localhost)
//! toolmesh scan --capabilities
//!
//! # Connect configured servers and list the merged tool table
//! toolmesh tools --discover
//!
//! # Route one call
//! toolmesh call read_file '{"path": "/etc/hosts"}'
//!
//! # Print SSE events from a streaming endpoint
//! toolmesh stream http://localhost:8000/v1/chat/completions --body request.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use toolmesh::config::{locate_config, RelayConfig};
use toolmesh::discovery::{Endpoint, EndpointDiscovery};
use toolmesh::router::{RouterError, ToolRouter};
use toolmesh::transport::{ReqwestBackend, RequestExecutor, StreamExecutor};

#[derive(Parser)]
#[command(name = "toolmesh", version, about = "Discover, connect and route LLM tool servers")]
struct Cli {
    /// Path to toolmesh.yaml (defaults to TOOLMESH_CONFIG or an upward search)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run endpoint discovery and print what was found
    Scan {
        /// Scan budget in milliseconds (defaults to discovery.scan_timeout_ms)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Service id to browse for (defaults to discovery.service_id)
        #[arg(long)]
        service: Option<String>,

        /// Also query each endpoint's capabilities
        #[arg(long)]
        capabilities: bool,
    },

    /// Connect configured servers and endpoints and print the tool table
    Tools {
        /// Also connect endpoints found by discovery
        #[arg(long)]
        discover: bool,

        /// Print OpenAI-style function definitions instead of a table
        #[arg(long)]
        openai: bool,
    },

    /// Route one tool call and print the result
    Call {
        /// Exposed tool name
        tool: String,

        /// JSON arguments object
        #[arg(default_value = "{}")]
        args: String,

        /// Also connect endpoints found by discovery
        #[arg(long)]
        discover: bool,
    },

    /// POST a body to an SSE endpoint and print each event
    Stream {
        url: String,

        /// File holding the JSON request body
        #[arg(long)]
        body: Option<PathBuf>,

        /// Extra header as `name: value`
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let location = locate_config(cli.config.as_deref(), &cwd);
    let config = location.load().context("failed to load configuration")?;
    toolmesh::init_tracing(&config.logging).context("failed to initialize logging")?;
    location.log(&config);

    let backend = Arc::new(
        ReqwestBackend::new(
            config.http.connect_timeout(),
            config.http.attempt_timeout(),
            config.http.stream_timeout(),
        )
        .context("failed to build HTTP client")?,
    );
    let executor = RequestExecutor::new(backend.clone()).with_attempt_timeout(config.http.attempt_timeout());

    match cli.command {
        Command::Scan {
            timeout_ms,
            service,
            capabilities,
        } => {
            let discovery = EndpointDiscovery::from_config(&config.discovery, executor);
            let timeout = timeout_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| config.discovery.scan_timeout());
            let service = service.unwrap_or_else(|| config.discovery.service_id.clone());

            let found = discovery.scan(timeout, &service).await;
            let manual = discovery.registered();
            if found.is_empty() && manual.is_empty() {
                println!("no endpoints found");
            }
            for endpoint in &found {
                print_endpoint(&discovery, endpoint, capabilities).await;
            }
            for entry in &manual {
                print_endpoint(&discovery, &entry.endpoint, capabilities).await;
            }
        }

        Command::Tools { discover, openai } => {
            let router = connect_all(&config, executor, discover).await;
            if openai {
                println!("{}", serde_json::to_string_pretty(&router.to_openai_tools())?);
            } else {
                print_tools(&router);
            }
            router.shutdown().await;
        }

        Command::Call {
            tool,
            args,
            discover,
        } => {
            let arguments: Value = serde_json::from_str(&args).context("arguments must be JSON")?;
            let router = connect_all(&config, executor, discover).await;
            let outcome = router.call_tool(&tool, arguments).await;
            router.shutdown().await;

            match outcome {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(RouterError::NotFound { name }) => {
                    bail!("no connected server exposes a tool named '{name}'")
                }
                Err(e) => return Err(e.into()),
            }
        }

        Command::Stream { url, body, headers } => {
            let headers = headers
                .iter()
                .map(|h| parse_header(h))
                .collect::<Result<Vec<_>>>()?;
            let body = match body {
                Some(path) => Some(
                    std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?,
                ),
                None => None,
            };

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });

            let streamer = StreamExecutor::new(backend)
                .with_breaker_threshold(config.stream.breaker_threshold)
                .with_open_timeout(config.http.attempt_timeout());
            let summary = streamer
                .stream(&url, &headers, body.as_deref(), &cancel, |event, done| {
                    if let Some(event) = event {
                        println!("{event}");
                    } else if done {
                        println!("[done]");
                    }
                })
                .await?;
            eprintln!(
                "{} events delivered, {} dropped{}",
                summary.delivered,
                summary.dropped,
                if summary.completed_by_sentinel { "" } else { " (no [DONE] sentinel)" }
            );
        }
    }

    Ok(())
}

/// Connect every stdio server and manual endpoint, plus discovered endpoints
/// when asked. Failures are reported and skipped.
async fn connect_all(config: &RelayConfig, executor: RequestExecutor, discover: bool) -> ToolRouter {
    let router = ToolRouter::new();
    let policy = config.retry_policy();
    let rpc_path = config.discovery.rpc_path.as_str();

    let mut servers: Vec<_> = config.servers.iter().collect();
    servers.sort_by(|a, b| a.0.cmp(b.0));
    for (name, server) in servers {
        if let Err(e) = router.connect_stdio(name, server).await {
            eprintln!("warning: {e}");
        }
    }

    let discovery = EndpointDiscovery::from_config(&config.discovery, executor.clone());
    let mut endpoints: Vec<Endpoint> = discovery.registered().into_iter().map(|r| r.endpoint).collect();
    if discover {
        endpoints.extend(
            discovery
                .scan(config.discovery.scan_timeout(), &config.discovery.service_id)
                .await,
        );
    }

    for endpoint in &endpoints {
        if let Err(e) = router
            .connect_endpoint(endpoint, rpc_path, executor.clone(), policy.clone())
            .await
        {
            eprintln!("warning: {e}");
        }
    }

    router
}

async fn print_endpoint(discovery: &EndpointDiscovery, endpoint: &Endpoint, capabilities: bool) {
    let source = format!("{:?}", endpoint.source).to_lowercase();
    if capabilities {
        let caps = discovery.query_capabilities(&endpoint.host, endpoint.port).await;
        let caps: Vec<&str> = caps.iter().collect();
        println!("{endpoint}  [{source}]  capabilities: {}", caps.join(", "));
    } else {
        println!("{endpoint}  [{source}]");
    }
}

fn print_tools(router: &ToolRouter) {
    let status = router.status();
    for client in &status.clients {
        println!(
            "{}  {}  {} tools  ({})",
            client.name, client.state, client.tool_count, client.target
        );
    }
    println!();

    let tools = router.tools();
    let width = tools.iter().map(|t| t.name.len()).max().unwrap_or(0);
    for tool in &tools {
        let summary = tool.description.lines().next().unwrap_or("");
        println!("{:width$}  {:<12}  {summary}", tool.name, tool.owner);
    }
    println!(
        "\n{} tools from {}/{} connected clients",
        status.total_tools,
        status.connected_clients(),
        status.total_clients()
    );
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("header must look like 'name: value', got '{raw}'"),
    }
}
