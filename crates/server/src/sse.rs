//! Event-stream (SSE) transport.
//!
//! `GET {base}/sse` composes the session context once, at stream open, and starts an MCP
//! service bound to it under a new session id. Messages posted to
//! `{base}/message?sessionId=<id>` are fed to that service and its replies are pushed onto
//! the stream. Closing the stream drops the session and cancels whatever it still has in
//! flight.

use crate::inbound;
use crate::server::GrafanaServer;
use crate::streamable_http::healthz;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::channel::mpsc;
use futures::{SinkExt as _, StreamExt as _};
use mcp_grafana_tools::ToolRegistry;
use mcp_grafana_upstream::{Composer, ExecutionContext, TransportMode};
use parking_lot::Mutex;
use rmcp::ServiceExt as _;
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Messages buffered per direction before a slow peer applies backpressure.
const MESSAGE_BUFFER: usize = 64;

type Sessions = Arc<Mutex<HashMap<String, mpsc::Sender<ClientJsonRpcMessage>>>>;

#[derive(Clone)]
pub struct SseState {
    registry: Arc<ToolRegistry>,
    composer: Arc<Composer>,
    root: ExecutionContext,
    base_path: Arc<str>,
    sessions: Sessions,
}

impl SseState {
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        composer: Arc<Composer>,
        root: ExecutionContext,
        base_path: &str,
    ) -> Self {
        Self {
            registry,
            composer,
            root,
            base_path: normalize_base_path(base_path).into(),
            sessions: Arc::default(),
        }
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

/// `""`, `"/"` and `"mcp/"` become `""`, `""` and `"/mcp"`.
#[must_use]
pub fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

pub fn router(state: SseState) -> Router {
    let base = state.base_path.clone();
    Router::new()
        .route(&format!("{base}/sse"), get(open_stream))
        .route(&format!("{base}/message"), post(post_message))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Removes the session and cancels its service when the stream is dropped.
struct SessionGuard {
    id: String,
    sessions: Sessions,
    cancel: CancellationToken,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        if self.sessions.lock().remove(&self.id).is_some() {
            info!(session_id = %self.id, "sse session closed");
        }
    }
}

async fn open_stream(State(state): State<SseState>, headers: HeaderMap) -> Response {
    let parent = state.root.child();
    let ctx = match inbound::compose(&state.composer, TransportMode::Sse, &parent, &headers) {
        Ok(ctx) => ctx,
        Err(err) => {
            warn!(error = %err, "rejecting event stream: invalid Grafana configuration");
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };

    let id = Uuid::new_v4().to_string();
    let (to_service, from_client) = mpsc::channel::<ClientJsonRpcMessage>(MESSAGE_BUFFER);
    let (to_client, from_service) = mpsc::channel::<ServerJsonRpcMessage>(MESSAGE_BUFFER);
    state.sessions.lock().insert(id.clone(), to_service);
    info!(session_id = %id, "sse session opened");

    let cancel = ctx.cancellation().clone();
    let server = GrafanaServer::new(Arc::clone(&state.registry), ctx);
    let session_id = id.clone();
    let service_cancel = cancel.clone();
    tokio::spawn(async move {
        match server
            .serve_with_ct((to_client, from_client), service_cancel.clone())
            .await
        {
            Ok(running) => {
                let reason = running.waiting().await;
                debug!(%session_id, ?reason, "sse service stopped");
            }
            Err(e) => warn!(%session_id, error = %e, "sse session failed to initialize"),
        }
        // Ends the event stream if the service stopped first.
        service_cancel.cancel();
    });

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}/message?sessionId={id}", state.base_path));
    let guard = SessionGuard {
        id,
        sessions: Arc::clone(&state.sessions),
        cancel,
    };

    let messages = futures::stream::unfold((from_service, guard), |(mut rx, guard)| async move {
        let cancel = guard.cancel.clone();
        let next = tokio::select! {
            () = cancel.cancelled() => None,
            msg = rx.next() => msg,
        };
        let msg = next?;
        let event = match Event::default().event("message").json_data(&msg) {
            Ok(event) => event,
            Err(e) => {
                warn!(session_id = %guard.id, error = %e, "dropping unencodable message");
                Event::default().comment("dropped")
            }
        };
        Some((Ok::<_, Infallible>(event), (rx, guard)))
    });
    let stream = futures::stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(messages);

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

async fn post_message(
    State(state): State<SseState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let sender = state.sessions.lock().get(&query.session_id).cloned();
    let Some(mut sender) = sender else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    let message: ClientJsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("invalid JSON-RPC message: {e}"))
                .into_response();
        }
    };

    if sender.send(message).await.is_err() {
        debug!(session_id = %query.session_id, "sse session closed before the message was delivered");
        return (StatusCode::GONE, "session closed").into_response();
    }
    StatusCode::ACCEPTED.into_response()
}
