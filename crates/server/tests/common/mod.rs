#![allow(dead_code)]

use anyhow::Context as _;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt as _;
use mcp_grafana_test_support::MockUpstream;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

pub use mcp_grafana_test_support::{KillOnDrop, pick_unused_port, wait_http_ok};

pub const BIN: &str = env!("CARGO_BIN_EXE_mcp-grafana");

/// A stand-in Grafana that answers dashboard searches and remembers who asked.
pub struct MockGrafana {
    pub upstream: MockUpstream,
    seen: Arc<Mutex<Vec<HeaderMap>>>,
}

impl MockGrafana {
    pub async fn start() -> anyhow::Result<Self> {
        let seen: Arc<Mutex<Vec<HeaderMap>>> = Arc::default();
        let recorder = Arc::clone(&seen);
        let app = Router::new().route(
            "/api/search",
            get(move |headers: HeaderMap| {
                let recorder = Arc::clone(&recorder);
                async move {
                    recorder.lock().push(headers);
                    Json(json!([{"uid": "cpu-1", "title": "CPU usage", "type": "dash-db"}]))
                }
            }),
        );
        let upstream = MockUpstream::start(app).await?;
        Ok(Self { upstream, seen })
    }

    pub fn url(&self) -> &str {
        self.upstream.base_url()
    }

    /// Headers of the most recent search request.
    pub fn last_headers(&self) -> HeaderMap {
        self.seen
            .lock()
            .last()
            .cloned()
            .unwrap_or_else(|| panic!("mock grafana saw no search request"))
    }

    pub fn request_count(&self) -> usize {
        self.seen.lock().len()
    }
}

pub fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// A server command with a clean Grafana environment.
pub fn server_command(args: &[&str], env: &[(&str, &str)]) -> Command {
    let mut cmd = Command::new(BIN);
    cmd.args(args)
        .env_remove("GRAFANA_URL")
        .env_remove("GRAFANA_API_KEY")
        .env("RUST_LOG", "warn")
        .stderr(Stdio::null());
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd
}

/// Spawn an HTTP transport on a free port and wait until it answers `/healthz`.
pub async fn spawn_http(
    transport: &str,
    extra_args: &[&str],
    env: &[(&str, &str)],
) -> anyhow::Result<(String, KillOnDrop)> {
    let port = pick_unused_port()?;
    let address = format!("127.0.0.1:{port}");
    let mut args = vec!["--transport", transport, "--address", address.as_str()];
    args.extend_from_slice(extra_args);
    let child = server_command(&args, env)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .context("spawn mcp-grafana")?;
    let child = KillOnDrop(child);

    let base_url = format!("http://{address}");
    wait_http_ok(&format!("{base_url}/healthz"), Duration::from_secs(20)).await?;
    Ok((base_url, child))
}

pub fn search_call(id: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": "grafana_search_dashboards", "arguments": {"query": "cpu"}}
    })
}

/// The JSON payload of a successful tool call response.
pub fn tool_payload(resp: &Value) -> anyhow::Result<Value> {
    anyhow::ensure!(
        resp["result"]["isError"] != json!(true),
        "tool call failed: {resp}"
    );
    let text = resp["result"]["content"][0]["text"]
        .as_str()
        .context("tool result has no text content")?;
    serde_json::from_str(text).context("tool text is not JSON")
}

/// The handshake a client sends before its first call on a session transport.
pub fn handshake() -> [Value; 2] {
    [
        json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "integration-test", "version": "0"}
            }
        }),
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    ]
}

/// POST one message to a streamable HTTP endpoint, accepting both JSON and event streams.
pub async fn post_mcp(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, &str)],
    body: &Value,
) -> anyhow::Result<reqwest::Response> {
    let mut req = client
        .post(url)
        .header("accept", "application/json, text/event-stream")
        .json(body);
    for (k, v) in headers {
        req = req.header(*k, *v);
    }
    req.send().await.context("POST")
}

/// The first JSON-RPC message on an event-stream response.
pub async fn first_message(resp: reqwest::Response) -> anyhow::Result<Value> {
    let mut events = sse_stream::SseStream::from_byte_stream(resp.bytes_stream());
    let evt = next_sse_event(&mut events).await?;
    serde_json::from_str(&evt.data.context("event data")?).context("event data is not JSON")
}

/// Next SSE event carrying data, skipping keep-alive comments.
pub async fn next_sse_event<S>(stream: &mut S) -> anyhow::Result<sse_stream::Sse>
where
    S: futures::Stream<Item = Result<sse_stream::Sse, sse_stream::Error>> + Unpin,
{
    loop {
        let evt = tokio::time::timeout(Duration::from_secs(10), stream.next())
            .await
            .context("timed out waiting for SSE event")?
            .context("event-stream ended")?
            .context("read SSE event")?;
        if evt.data.as_deref().is_some_and(|d| !d.trim().is_empty()) {
            return Ok(evt);
        }
    }
}
