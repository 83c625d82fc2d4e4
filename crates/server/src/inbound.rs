//! Per-request context composition for the HTTP transports.

use axum::http::HeaderMap;
use mcp_grafana_upstream::sources::on_behalf_of_from_headers;
use mcp_grafana_upstream::{Composer, ExecutionContext, Result, TransportMode};

/// Compose the context for one inbound HTTP request.
///
/// Base URL and API key follow header > environment > default. An on-behalf-of token pair
/// supplied by the hosting runtime is injected on top.
///
/// # Errors
///
/// Returns a config error for a malformed base URL or a half-supplied token pair.
pub fn compose(
    composer: &Composer,
    mode: TransportMode,
    parent: &ExecutionContext,
    headers: &HeaderMap,
) -> Result<ExecutionContext> {
    let ctx = composer.context_for(mode, parent, Some(headers))?;
    match on_behalf_of_from_headers(headers)? {
        Some(tokens) => ctx.with_on_behalf_of(tokens.access_token(), tokens.id_token()),
        None => Ok(ctx),
    }
}
