//! MCP tool annotations derived from what a tool does upstream.

use rmcp::model::ToolAnnotations;

/// Upstream effect of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Only reads (GET-like, including read-only POST query endpoints).
    Read,
    /// Creates something new on every call (POST semantics).
    Create,
    /// Replaces existing state (PUT semantics).
    Replace,
}

/// Generate annotations for a tool.
///
/// `openWorldHint` is always set: every tool talks to an external Grafana.
#[must_use]
pub fn annotations(title: &str, effect: Effect) -> ToolAnnotations {
    let (read_only_hint, destructive_hint, idempotent_hint) = match effect {
        Effect::Read => (true, false, true),
        Effect::Create => (false, false, false),
        Effect::Replace => (false, true, true),
    };
    ToolAnnotations {
        title: Some(title.to_string()),
        read_only_hint: Some(read_only_hint),
        destructive_hint: Some(destructive_hint),
        idempotent_hint: Some(idempotent_hint),
        open_world_hint: Some(true),
    }
}
