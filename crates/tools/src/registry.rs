//! Tool dispatch contract and registration surface.
//!
//! Every tool is an async function `(ExecutionContext, Args) -> Result<Output>`. The typed
//! adapter deserializes arguments, runs the tool and renders the outcome as an MCP
//! `CallToolResult`. Categories that are not selected are never registered.

use crate::semantics::{Effect, annotations};
use async_trait::async_trait;
use mcp_grafana_upstream::{ExecutionContext, GrafanaError, Result};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use rmcp::schemars::{self, JsonSchema};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ToolCategory {
    Search,
    Datasource,
    Incident,
    Prometheus,
    Loki,
    Alerting,
    Dashboard,
    OnCall,
    Asserts,
    Admin,
    Pyroscope,
}

impl ToolCategory {
    pub const ALL: [Self; 11] = [
        Self::Search,
        Self::Datasource,
        Self::Incident,
        Self::Prometheus,
        Self::Loki,
        Self::Alerting,
        Self::Dashboard,
        Self::OnCall,
        Self::Asserts,
        Self::Admin,
        Self::Pyroscope,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Datasource => "datasource",
            Self::Incident => "incident",
            Self::Prometheus => "prometheus",
            Self::Loki => "loki",
            Self::Alerting => "alerting",
            Self::Dashboard => "dashboard",
            Self::OnCall => "oncall",
            Self::Asserts => "asserts",
            Self::Admin => "admin",
            Self::Pyroscope => "pyroscope",
        }
    }

    fn tools(self) -> Vec<ToolSpec> {
        match self {
            Self::Search => crate::search::tools(),
            Self::Datasource => crate::datasources::tools(),
            Self::Incident => crate::incident::tools(),
            Self::Prometheus => crate::prometheus::tools(),
            Self::Loki => crate::loki::tools(),
            Self::Alerting => crate::alerting::tools(),
            Self::Dashboard => crate::dashboard::tools(),
            Self::OnCall => crate::oncall::tools(),
            Self::Asserts => crate::asserts::tools(),
            Self::Admin => crate::admin::tools(),
            Self::Pyroscope => crate::pyroscope::tools(),
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown tool category '{s}'"))
    }
}

/// Which categories a server instance exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSelection {
    enabled: BTreeSet<ToolCategory>,
}

impl Default for ToolSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl ToolSelection {
    #[must_use]
    pub fn all() -> Self {
        Self {
            enabled: ToolCategory::ALL.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn none() -> Self {
        Self {
            enabled: BTreeSet::new(),
        }
    }

    /// Parse a comma-separated category list. Unknown names are logged and skipped.
    #[must_use]
    pub fn from_enabled_list(csv: &str) -> Self {
        let mut enabled = BTreeSet::new();
        for name in csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match name.parse::<ToolCategory>() {
                Ok(category) => {
                    enabled.insert(category);
                }
                Err(e) => warn!(category = %name, "{e}; ignoring"),
            }
        }
        Self { enabled }
    }

    #[must_use]
    pub fn with(mut self, category: ToolCategory) -> Self {
        self.enabled.insert(category);
        self
    }

    #[must_use]
    pub fn without(mut self, category: ToolCategory) -> Self {
        self.enabled.remove(&category);
        self
    }

    #[must_use]
    pub fn is_enabled(&self, category: ToolCategory) -> bool {
        self.enabled.contains(&category)
    }
}

/// Object-safe handle a registered tool is invoked through.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with raw JSON arguments.
    async fn call(&self, ctx: ExecutionContext, arguments: Value) -> Result<Value>;
}

struct TypedHandler<A, R, F> {
    f: F,
    _marker: PhantomData<fn(A) -> R>,
}

#[async_trait]
impl<A, R, F, Fut> ToolHandler for TypedHandler<A, R, F>
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(ExecutionContext, A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    async fn call(&self, ctx: ExecutionContext, arguments: Value) -> Result<Value> {
        let arguments = if arguments.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            arguments
        };
        let args: A = serde_json::from_value(arguments)
            .map_err(|e| GrafanaError::argument(format!("invalid arguments: {e}")))?;
        let output = (self.f)(ctx, args).await?;
        serde_json::to_value(output)
            .map_err(|e| GrafanaError::call(format!("failed to encode tool result: {e}")))
    }
}

/// A tool's registration record.
#[derive(Clone)]
pub struct ToolSpec {
    name: &'static str,
    title: &'static str,
    description: &'static str,
    effect: Effect,
    input_schema: Arc<JsonObject>,
    handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("effect", &self.effect)
            .finish_non_exhaustive()
    }
}

impl ToolSpec {
    /// Wrap a typed tool function. The input schema is derived from `A`.
    pub fn new<A, R, F, Fut>(
        name: &'static str,
        title: &'static str,
        description: &'static str,
        effect: Effect,
        f: F,
    ) -> Self
    where
        A: JsonSchema + DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(ExecutionContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        Self {
            name,
            title,
            description,
            effect,
            input_schema: Arc::new(input_schema::<A>()),
            handler: Arc::new(TypedHandler {
                f,
                _marker: PhantomData,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn to_tool(&self) -> Tool {
        let mut tool = Tool::new(self.name, self.description, Arc::clone(&self.input_schema));
        tool.annotations = Some(annotations(self.title, self.effect));
        tool
    }
}

fn input_schema<A: JsonSchema>() -> JsonObject {
    let schema = schemars::schema_for!(A);
    let mut object = serde_json::to_value(&schema)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    object.remove("$schema");
    object
        .entry("type")
        .or_insert_with(|| Value::String("object".to_string()));
    object
}

#[derive(Debug, Error)]
#[error("tool not found: {0}")]
pub struct ToolNotFound(pub String);

/// The set of tools one server instance exposes.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
    by_name: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new(selection: &ToolSelection) -> Self {
        let mut tools = Vec::new();
        for category in ToolCategory::ALL {
            if selection.is_enabled(category) {
                let specs = category.tools();
                info!(category = %category, tools = specs.len(), "enabled tool category");
                tools.extend(specs);
            } else {
                info!(category = %category, "tool category disabled");
            }
        }
        Self::from_specs(tools)
    }

    #[must_use]
    pub fn from_specs(tools: Vec<ToolSpec>) -> Self {
        let by_name = tools.iter().enumerate().map(|(i, t)| (t.name, i)).collect();
        Self { tools, by_name }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// MCP descriptors for every registered tool.
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.iter().map(ToolSpec::to_tool).collect()
    }

    /// Run a registered tool.
    ///
    /// Tool failures are returned as an error result (`isError: true`) whose structured
    /// content names the error kind.
    ///
    /// # Errors
    ///
    /// Returns [`ToolNotFound`] if no tool with this name is registered.
    pub async fn call_tool(
        &self,
        ctx: &ExecutionContext,
        name: &str,
        arguments: Value,
    ) -> std::result::Result<CallToolResult, ToolNotFound> {
        let spec = self
            .by_name
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolNotFound(name.to_string()))?;

        debug!(tool = %name, "calling tool");
        match spec.handler.call(ctx.clone(), arguments).await {
            Ok(value) => Ok(success_result(value)),
            Err(err) => {
                warn!(tool = %name, kind = %err.kind(), error = %err, "tool call failed");
                Ok(error_result(&err))
            }
        }
    }
}

fn success_result(value: Value) -> CallToolResult {
    let text = match value {
        Value::String(s) => s,
        other => serde_json::to_string(&other).unwrap_or_else(|_| other.to_string()),
    };
    CallToolResult::success(vec![Content::text(text)])
}

/// Render a tool failure.
#[must_use]
pub fn error_result(err: &GrafanaError) -> CallToolResult {
    let message = err.to_string();
    CallToolResult {
        content: vec![Content::text(message.clone())],
        structured_content: Some(json!({
            "error": { "kind": err.kind().as_str(), "message": message }
        })),
        is_error: Some(true),
        meta: None,
    }
}
