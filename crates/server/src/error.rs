//! Error types for the server binary.

use thiserror::Error;

/// Transport startup and I/O failures.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),

    /// The client closed the session or broke protocol before the handshake completed.
    #[error("MCP handshake failed: {0}")]
    Initialize(#[from] rmcp::service::ServerInitializeError),

    /// The task serving an MCP session panicked or was aborted.
    #[error("MCP session task failed: {0}")]
    Session(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ServerError>;
