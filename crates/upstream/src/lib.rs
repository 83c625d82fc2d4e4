//! Per-request Grafana configuration: where credentials come from, how they are merged for
//! each transport, and how a tool call turns them into an authenticated HTTP client.
//!
//! Nothing here holds process-wide mutable state. Every request or session owns its
//! [`ExecutionContext`], and every tool call builds its own [`AuthenticatedClient`].

pub mod client;
pub mod composer;
pub mod config;
pub mod context;
pub mod error;
pub mod safety;
pub mod sources;
pub mod tls;

pub use client::{ApiPath, AuthenticatedClient, ClientOptions, ServiceTarget, build_client};
pub use composer::{Composer, CredentialSource, TransportMode};
pub use config::{Credentials, ExecutionConfig, OnBehalfOf, TlsConfig};
pub use context::ExecutionContext;
pub use error::{ErrorKind, GrafanaError, Result, ResultExt};
pub use sources::Environment;
