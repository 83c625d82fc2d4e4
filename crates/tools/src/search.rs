use crate::registry::ToolSpec;
use crate::semantics::Effect;
use mcp_grafana_upstream::{ExecutionContext, Result, ResultExt, ServiceTarget};
use rmcp::schemars;
use serde::Deserialize;
use serde_json::Value;

const DASHBOARD_TYPE: &str = "dash-db";

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct SearchDashboardsArgs {
    /// The query to search for
    #[serde(default)]
    pub query: String,
}

pub(crate) fn search_query(query: &str) -> Vec<(&'static str, String)> {
    if query.is_empty() {
        return Vec::new();
    }
    vec![
        ("query", query.to_string()),
        ("type", DASHBOARD_TYPE.to_string()),
    ]
}

async fn search_dashboards(ctx: ExecutionContext, args: SearchDashboardsArgs) -> Result<Value> {
    let client = ctx.client(ServiceTarget::Api).await?;
    client
        .get_json("search", &search_query(&args.query))
        .await
        .context("search dashboards")
}

pub(crate) fn tools() -> Vec<ToolSpec> {
    vec![ToolSpec::new(
        "grafana_search_dashboards",
        "Search dashboards",
        "Search for Grafana dashboards by a query string. Returns a list of matching dashboards \
         with details like title, UID, folder, tags, and URL.",
        Effect::Read,
        search_dashboards,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_sends_no_filters() {
        assert!(search_query("").is_empty());
        assert_eq!(
            search_query("cpu"),
            vec![("query", "cpu".to_string()), ("type", "dash-db".to_string())]
        );
    }
}
