//! The mcp-grafana server: CLI, logging and the three MCP transports.
//!
//! Every transport composes an [`ExecutionContext`] at its own boundary (once per process for
//! stdio, once per stream for SSE, once per request for streamable HTTP) and serves the shared
//! [`server::GrafanaServer`] against it. Nothing below the transport reads credentials.

pub mod cli;
pub mod error;
pub mod inbound;
pub mod server;
pub mod sse;
pub mod stdio;
pub mod streamable_http;

use anyhow::Context as _;
use cli::{Cli, LogFormat, Transport};
use error::ServerError;
use mcp_grafana_tools::ToolRegistry;
use mcp_grafana_upstream::{Composer, Environment, ExecutionContext};
use server::GrafanaServer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Install the global subscriber. Logs go to stderr; stdout belongs to the stdio transport.
pub fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Json => registry.with(fmt.json()).init(),
        LogFormat::Text => registry.with(fmt).init(),
    }
}

/// Serve the selected transport until input ends or `shutdown` fires.
///
/// # Errors
///
/// Fails if the stdio session config cannot be composed, the stdio client never completes the
/// handshake, the listen address cannot be bound, or the HTTP server stops with an I/O error.
pub async fn run(cli: Cli, shutdown: CancellationToken) -> anyhow::Result<()> {
    let registry = Arc::new(ToolRegistry::new(&cli.tool_selection()));
    info!(tools = registry.len(), transport = ?cli.transport, "starting mcp-grafana");
    let composer = Arc::new(Composer::new(cli.base_config(), Environment::process()));
    let root = ExecutionContext::with_cancellation(shutdown.clone());

    match cli.transport {
        Transport::Stdio => {
            let session = composer
                .for_session(&root)
                .context("compose stdio session config")?;
            let (stdin, stdout) = rmcp::transport::stdio();
            let server = GrafanaServer::new(registry, session);
            stdio::serve(server, stdin, stdout, shutdown).await?;
        }
        Transport::Sse => {
            let state = sse::SseState::new(registry, composer, root, &cli.base_path);
            serve_http(&cli.address, sse::router(state), shutdown).await?;
        }
        Transport::StreamableHttp => {
            let app = streamable_http::router(registry, composer, root, &cli.endpoint_path);
            serve_http(&cli.address, app, shutdown).await?;
        }
    }
    Ok(())
}

async fn serve_http(
    address: &str,
    app: axum::Router,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.to_string(),
            source,
        })?;
    let local = listener.local_addr().map_err(ServerError::Serve)?;
    info!(address = %local, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(ServerError::Serve)
}
