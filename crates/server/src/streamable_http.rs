//! Stateless streamable HTTP transport.
//!
//! The MCP exchange itself is served by rmcp's `StreamableHttpService` without sessions. A
//! middleware in front of it composes the context for each `POST` from that request's
//! headers and stores it in the request extensions, so the context built for one request is
//! never visible to another.

use crate::inbound;
use crate::server::GrafanaServer;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use mcp_grafana_tools::ToolRegistry;
use mcp_grafana_upstream::{Composer, ExecutionContext, GrafanaError, TransportMode};
use rmcp::ErrorData;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

/// Largest body read back to recover the request id of a rejected message.
const MAX_REJECTED_BODY: usize = 1024 * 1024;

#[derive(Clone)]
struct ComposeState {
    composer: Arc<Composer>,
    root: ExecutionContext,
}

/// Routes for `endpoint_path` plus `/healthz`.
///
/// `root` supplies the cancellation that server shutdown triggers.
pub fn router(
    registry: Arc<ToolRegistry>,
    composer: Arc<Composer>,
    root: ExecutionContext,
    endpoint_path: &str,
) -> Router {
    let fallback = root.clone();
    let mcp = StreamableHttpService::new(
        move || Ok(GrafanaServer::new(Arc::clone(&registry), fallback.clone())),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig {
            stateful_mode: false,
            cancellation_token: root.cancellation().clone(),
            ..Default::default()
        },
    );
    let state = ComposeState { composer, root };

    Router::new()
        .route_service(endpoint_path, mcp)
        .route_layer(middleware::from_fn_with_state(state, compose_context))
        .route("/healthz", get(healthz))
}

pub(crate) async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn compose_context(
    State(state): State<ComposeState>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }
    match inbound::compose(
        &state.composer,
        TransportMode::StreamableHttp,
        &state.root.child(),
        request.headers(),
    ) {
        Ok(ctx) => {
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(err) => {
            warn!(error = %err, "rejecting request: invalid Grafana configuration");
            let id = request_id(request.into_body()).await;
            config_error_response(id, &err)
        }
    }
}

/// The id of the JSON-RPC message in `body`, or null.
async fn request_id(body: Body) -> Value {
    axum::body::to_bytes(body, MAX_REJECTED_BODY)
        .await
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .and_then(|message| message.get("id").cloned())
        .unwrap_or(Value::Null)
}

fn config_error_response(id: Value, err: &GrafanaError) -> Response {
    let error = ErrorData::invalid_request(
        err.to_string(),
        Some(json!({ "kind": err.kind().as_str() })),
    );
    let body = json!({ "jsonrpc": "2.0", "id": id, "error": error });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}
