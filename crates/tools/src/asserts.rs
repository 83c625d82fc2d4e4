use crate::registry::ToolSpec;
use crate::semantics::Effect;
use crate::timerange::parse_rfc3339;
use chrono::{DateTime, Utc};
use mcp_grafana_upstream::{ExecutionContext, GrafanaError, Result, ResultExt, ServiceTarget};
use reqwest::Method;
use rmcp::schemars;
use serde::{Deserialize, Serialize};

const ALERT_CATEGORIES: [&str; 5] = ["saturation", "amend", "anomaly", "failure", "error"];

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetAssertionsArgs {
    /// The start time in RFC3339 format
    pub start_time: String,
    /// The end time in RFC3339 format
    pub end_time: String,
    /// The type of the entity to list (e.g. Service, Node, Pod, etc.)
    #[serde(default)]
    pub entity_type: String,
    /// The name of the entity to list
    #[serde(default)]
    pub entity_name: String,
    /// The env of the entity to list
    #[serde(default)]
    pub env: Option<String>,
    /// The site of the entity to list
    #[serde(default)]
    pub site: Option<String>,
    /// The namespace of the entity to list
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
struct Scope {
    #[serde(skip_serializing_if = "Option::is_none")]
    env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
struct Entity {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    scope: Scope,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SummaryRequest {
    start_time: i64,
    end_time: i64,
    entity_keys: Vec<Entity>,
    suggestion_src_entities: Vec<Entity>,
    alert_categories: [&'static str; 5],
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn summary_request(args: GetAssertionsArgs) -> Result<SummaryRequest> {
    let start = parse_rfc3339("startTime", &args.start_time)?;
    let end = parse_rfc3339("endTime", &args.end_time)?;
    let keep = |v: Option<String>| v.filter(|s| !s.is_empty());
    Ok(SummaryRequest {
        start_time: millis(start),
        end_time: millis(end),
        entity_keys: vec![Entity {
            name: args.entity_name,
            kind: args.entity_type,
            scope: Scope {
                env: keep(args.env),
                site: keep(args.site),
                namespace: keep(args.namespace),
            },
        }],
        suggestion_src_entities: Vec::new(),
        alert_categories: ALERT_CATEGORIES,
    })
}

async fn get_assertions(ctx: ExecutionContext, args: GetAssertionsArgs) -> Result<String> {
    let body = summary_request(args)?;
    let client = ctx.client(ServiceTarget::Asserts).await?;
    let request = client
        .request(Method::POST, "v1/assertions/llm-summary")?
        .json(&body);
    let response = client
        .send(request)
        .await
        .context("failed to fetch assertions")?;
    String::from_utf8(response)
        .map_err(|_| GrafanaError::call("assertions summary is not valid UTF-8"))
}

pub(crate) fn tools() -> Vec<ToolSpec> {
    vec![ToolSpec::new(
        "get_assertions",
        "Get assertions summary",
        "Get assertion summary for a given entity with its type, name, env, site, namespace, \
         and a time range",
        Effect::Read,
        get_assertions,
    )]
}
