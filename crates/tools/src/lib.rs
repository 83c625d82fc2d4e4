//! The Grafana tool catalog.
//!
//! Tools are grouped by [`ToolCategory`] and exposed through a [`ToolRegistry`]. Every tool
//! receives the [`mcp_grafana_upstream::ExecutionContext`] of the request that invoked it and
//! builds its upstream client from that context alone.

mod args;
mod envelope;
mod registry;
mod selector;
mod semantics;
mod timerange;

mod admin;
mod alerting;
mod asserts;
mod dashboard;
mod datasources;
mod incident;
mod loki;
mod oncall;
mod prometheus;
mod pyroscope;
mod search;

pub use registry::{
    ToolCategory, ToolHandler, ToolNotFound, ToolRegistry, ToolSelection, ToolSpec, error_result,
};
pub use selector::{LabelMatcher, Selector};
pub use semantics::{Effect, annotations};
