//! The MCP service every transport serves.
//!
//! Transports compose an [`ExecutionContext`] at their own boundary. Streamable HTTP stores
//! the per-request context in the request extensions; stdio and SSE bind one context to the
//! whole session. [`GrafanaServer`] only picks the right one and hands it to the registry.

use axum::http::request::Parts;
use mcp_grafana_tools::ToolRegistry;
use mcp_grafana_upstream::ExecutionContext;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Implementation, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData, RoleServer, ServerHandler};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub const SERVER_NAME: &str = "mcp-grafana";

const INSTRUCTIONS: &str = "Tools for a Grafana instance: dashboards, datasources, Prometheus \
    and Loki queries, alerting, incidents, on-call, Asserts, admin and profiling.";

#[derive(Debug, Clone)]
pub struct GrafanaServer {
    registry: Arc<ToolRegistry>,
    session: ExecutionContext,
}

impl GrafanaServer {
    /// `session` is used for every call that does not arrive with its own composed context.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, session: ExecutionContext) -> Self {
        Self { registry, session }
    }

    /// A fresh child of the context composed for this request's HTTP exchange, or of the
    /// session context.
    fn context_for(&self, request: &RequestContext<RoleServer>) -> ExecutionContext {
        request
            .extensions
            .get::<Parts>()
            .and_then(|parts| parts.extensions.get::<ExecutionContext>())
            .unwrap_or(&self.session)
            .child()
    }
}

impl ServerHandler for GrafanaServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Implementation::from_build_env()
            },
            instructions: Some(INSTRUCTIONS.into()),
            ..ServerInfo::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(
            self.registry.list_tools(),
        )))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let ctx = self.context_for(&context);
            // Upstream calls still running when the call ends are abandoned.
            let _guard = ctx.cancellation().clone().drop_guard();
            let arguments = Value::Object(request.arguments.unwrap_or_default());

            tokio::select! {
                result = self.registry.call_tool(&ctx, &request.name, arguments) => {
                    result.map_err(|e| ErrorData::invalid_params(e.to_string(), None))
                }
                () = context.ct.cancelled() => {
                    debug!(tool = %request.name, "tool call cancelled");
                    Err(ErrorData::internal_error("request cancelled", None))
                }
            }
        }
    }
}
