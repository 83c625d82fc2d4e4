//! MCP over stdin/stdout.
//!
//! The session context is composed once by the caller before the handshake; every call on the
//! stream runs against that same context.

use crate::error::Result;
use crate::server::GrafanaServer;
use rmcp::ServiceExt as _;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Serve one session until the input ends or `shutdown` fires.
///
/// # Errors
///
/// Fails if the client never completes the initialize handshake or the service task panics.
pub async fn serve<R, W>(
    server: GrafanaServer,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let running = server.serve_with_ct((reader, writer), shutdown).await?;
    let reason = running.waiting().await?;
    info!(?reason, "stdio session ended");
    Ok(())
}
