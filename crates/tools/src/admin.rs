use crate::args::non_empty;
use crate::registry::ToolSpec;
use crate::semantics::Effect;
use mcp_grafana_upstream::{ExecutionContext, Result, ResultExt, ServiceTarget};
use rmcp::schemars;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct ListTeamsArgs {
    /// The query to search for teams. Can be left empty to fetch all teams
    #[serde(default)]
    pub query: Option<String>,
}

async fn list_teams(ctx: ExecutionContext, args: ListTeamsArgs) -> Result<Value> {
    let client = ctx.client(ServiceTarget::Api).await?;
    let query: Vec<(&str, String)> = non_empty(args.query.as_deref())
        .map(|q| ("query", q.to_string()))
        .into_iter()
        .collect();
    client
        .get_json("teams/search", &query)
        .await
        .context("search teams")
}

pub(crate) fn tools() -> Vec<ToolSpec> {
    vec![ToolSpec::new(
        "grafana_list_teams",
        "List teams",
        "Search for Grafana teams by a query string. Returns a list of matching teams with \
         details like name, ID, and URL.",
        Effect::Read,
        list_teams,
    )]
}
