use crate::args::require;
use crate::registry::ToolSpec;
use crate::semantics::Effect;
use mcp_grafana_upstream::{
    ApiPath, ExecutionContext, GrafanaError, Result, ResultExt, ServiceTarget,
};
use rmcp::schemars;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct ListDatasourcesArgs {
    /// The type of datasources to search for. For example, 'prometheus', 'loki', 'tempo', etc...
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatasourceSummary {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Case-insensitive substring filter on the datasource type.
pub(crate) fn filter_by_type(
    datasources: Vec<DatasourceSummary>,
    kind: Option<&str>,
) -> Vec<DatasourceSummary> {
    let Some(kind) = kind.filter(|k| !k.is_empty()) else {
        return datasources;
    };
    let kind = kind.to_lowercase();
    datasources
        .into_iter()
        .filter(|ds| ds.kind.to_lowercase().contains(&kind))
        .collect()
}

async fn list_datasources(
    ctx: ExecutionContext,
    args: ListDatasourcesArgs,
) -> Result<Vec<DatasourceSummary>> {
    let client = ctx.client(ServiceTarget::Api).await?;
    let all: Vec<DatasourceSummary> = client
        .get_json("datasources", &[])
        .await
        .context("list datasources")?;
    Ok(filter_by_type(all, args.kind.as_deref()))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct GetDatasourceByUidArgs {
    /// The uid of the datasource
    pub uid: String,
}

async fn get_datasource_by_uid(
    ctx: ExecutionContext,
    args: GetDatasourceByUidArgs,
) -> Result<Value> {
    require("uid", &args.uid)?;
    let client = ctx.client(ServiceTarget::Api).await?;
    client
        .get_json(ApiPath::new("datasources/uid").segment(&args.uid), &[])
        .await
        .map_err(|e| match e.status() {
            Some(404) => GrafanaError::UpstreamCall {
                status: Some(404),
                message: format!(
                    "datasource with UID '{}' not found. Please check if the datasource exists and is accessible",
                    args.uid
                ),
            },
            _ => e.context(format!("get datasource by uid {}", args.uid)),
        })
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct GetDatasourceByNameArgs {
    /// The name of the datasource
    pub name: String,
}

async fn get_datasource_by_name(
    ctx: ExecutionContext,
    args: GetDatasourceByNameArgs,
) -> Result<Value> {
    require("name", &args.name)?;
    let client = ctx.client(ServiceTarget::Api).await?;
    client
        .get_json(ApiPath::new("datasources/name").segment(&args.name), &[])
        .await
        .context(format!("get datasource by name {}", args.name))
}

pub(crate) fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "list_datasources",
            "List datasources",
            "List available Grafana datasources. Optionally filter by datasource type (e.g., \
             'prometheus', 'loki'). Returns a summary list including ID, UID, name, type, and \
             default status.",
            Effect::Read,
            list_datasources,
        ),
        ToolSpec::new(
            "get_datasource_by_uid",
            "Get datasource by UID",
            "Retrieves detailed information about a specific datasource using its UID. Returns \
             the full datasource model, including name, type, URL, access settings, JSON data, \
             and secure JSON field status.",
            Effect::Read,
            get_datasource_by_uid,
        ),
        ToolSpec::new(
            "get_datasource_by_name",
            "Get datasource by name",
            "Retrieves detailed information about a specific datasource using its name. Returns \
             the full datasource model, including UID, type, URL, access settings, JSON data, \
             and secure JSON field status.",
            Effect::Read,
            get_datasource_by_name,
        ),
    ]
}
