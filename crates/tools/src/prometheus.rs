//! Prometheus tools, reached through the Grafana datasource proxy.

use crate::args::{count_or, non_empty, paginate, require};
use crate::envelope::success_data;
use crate::registry::ToolSpec;
use crate::selector::Selector;
use crate::semantics::Effect;
use crate::timerange::{parse_rfc3339, parse_time};
use chrono::{DateTime, Utc};
use mcp_grafana_upstream::{
    ApiPath, AuthenticatedClient, ExecutionContext, GrafanaError, Result, ResultExt,
    ServiceTarget,
};
use regex::Regex;
use rmcp::schemars;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

const SERVICE: &str = "Prometheus";

async fn get_data<T: DeserializeOwned>(
    client: &AuthenticatedClient,
    path: impl Into<ApiPath>,
    query: &[(&str, String)],
) -> Result<T> {
    let body: Value = client.get_json(path, query).await?;
    success_data(SERVICE, body)
}

async fn proxy(ctx: &ExecutionContext, datasource_uid: &str) -> Result<AuthenticatedClient> {
    require("datasourceUid", datasource_uid)?;
    ctx.client(ServiceTarget::Datasource(datasource_uid)).await
}

fn unix_seconds(t: DateTime<Utc>) -> String {
    t.timestamp().to_string()
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MetricMetadataArgs {
    /// The UID of the datasource to query
    pub datasource_uid: String,
    /// The maximum number of metrics to return
    #[serde(default)]
    pub limit: Option<i64>,
    /// The maximum number of metadata entries per metric
    #[serde(default)]
    pub limit_per_metric: Option<i64>,
    /// The metric to query
    #[serde(default)]
    pub metric: Option<String>,
}

async fn list_metric_metadata(ctx: ExecutionContext, args: MetricMetadataArgs) -> Result<Value> {
    let limit = count_or("limit", args.limit, 10)?;
    let limit_per_metric = count_or("limitPerMetric", args.limit_per_metric, 0)?;
    let client = proxy(&ctx, &args.datasource_uid).await?;

    let mut query = vec![("limit", limit.to_string())];
    if limit_per_metric > 0 {
        query.push(("limit_per_metric", limit_per_metric.to_string()));
    }
    if let Some(metric) = non_empty(args.metric.as_deref()) {
        query.push(("metric", metric.to_string()));
    }
    get_data(&client, "api/v1/metadata", &query)
        .await
        .context("list metric metadata")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub(crate) enum QueryType {
    #[default]
    Range,
    Instant,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryArgs {
    /// The UID of the datasource to query
    pub datasource_uid: String,
    /// The PromQL expression to query
    pub expr: String,
    /// The start time. Supported formats are RFC3339 or relative to now (e.g. 'now', 'now-1h', 'now-30m')
    pub start_time: String,
    /// The end time. Required if queryType is 'range', ignored if queryType is 'instant'
    #[serde(default)]
    pub end_time: Option<String>,
    /// The time series step size in seconds. Required if queryType is 'range', ignored if queryType is 'instant'
    #[serde(default)]
    pub step_seconds: Option<i64>,
    /// The type of query to use. Either 'range' or 'instant'
    #[serde(default)]
    pub query_type: QueryType,
}

/// Resolve the query endpoint and its parameters.
pub(crate) fn query_request(
    args: &QueryArgs,
    now: DateTime<Utc>,
) -> Result<(&'static str, Vec<(&'static str, String)>)> {
    require("expr", &args.expr)?;
    let start = parse_time("startTime", &args.start_time, now)?;
    match args.query_type {
        QueryType::Instant => Ok((
            "api/v1/query",
            vec![("query", args.expr.clone()), ("time", unix_seconds(start))],
        )),
        QueryType::Range => {
            let end = parse_time("endTime", args.end_time.as_deref().unwrap_or_default(), now)?;
            let step = match args.step_seconds {
                Some(step) if step > 0 => step,
                _ => {
                    return Err(GrafanaError::argument(
                        "stepSeconds must be a positive number for range queries",
                    ));
                }
            };
            Ok((
                "api/v1/query_range",
                vec![
                    ("query", args.expr.clone()),
                    ("start", unix_seconds(start)),
                    ("end", unix_seconds(end)),
                    ("step", step.to_string()),
                ],
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Value,
}

async fn query_prometheus(ctx: ExecutionContext, args: QueryArgs) -> Result<Value> {
    let (path, query) = query_request(&args, Utc::now())?;
    let client = proxy(&ctx, &args.datasource_uid).await?;
    let data: QueryData = get_data(&client, path, &query)
        .await
        .context("query prometheus")?;
    Ok(data.result)
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MetricNamesArgs {
    /// The UID of the datasource to query
    pub datasource_uid: String,
    /// The regex to match against the metric names
    #[serde(default)]
    pub regex: Option<String>,
    /// The maximum number of results to return
    #[serde(default)]
    pub limit: Option<i64>,
    /// The page number to return
    #[serde(default)]
    pub page: Option<i64>,
}

pub(crate) fn filter_metric_names(
    names: Vec<String>,
    regex: Option<&str>,
    limit: i64,
    page: i64,
) -> Result<Vec<String>> {
    let names = match non_empty(regex) {
        Some(pattern) => {
            let re = Regex::new(pattern)
                .map_err(|e| GrafanaError::argument(format!("invalid regex '{pattern}': {e}")))?;
            names.into_iter().filter(|n| re.is_match(n)).collect()
        }
        None => names,
    };
    Ok(paginate(names, limit, page))
}

async fn list_metric_names(ctx: ExecutionContext, args: MetricNamesArgs) -> Result<Vec<String>> {
    let limit = count_or("limit", args.limit, 10)?;
    let page = count_or("page", args.page, 1)?;
    let client = proxy(&ctx, &args.datasource_uid).await?;
    let names: Vec<String> = get_data(&client, "api/v1/label/__name__/values", &[])
        .await
        .context("list metric names")?;
    filter_metric_names(names, args.regex.as_deref(), limit, page)
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LabelNamesArgs {
    /// The UID of the datasource to query
    pub datasource_uid: String,
    /// Optionally, a list of label matchers to filter the results by
    #[serde(default)]
    pub matches: Vec<Selector>,
    /// Optionally, the start time of the time range to filter the results by
    #[serde(default)]
    pub start_rfc3339: Option<String>,
    /// Optionally, the end time of the time range to filter the results by
    #[serde(default)]
    pub end_rfc3339: Option<String>,
    /// Optionally, the maximum number of results to return
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LabelValuesArgs {
    /// The UID of the datasource to query
    pub datasource_uid: String,
    /// The name of the label to query
    pub label_name: String,
    /// Optionally, a list of selectors to filter the results by
    #[serde(default)]
    pub matches: Vec<Selector>,
    /// Optionally, the start time of the query
    #[serde(default)]
    pub start_rfc3339: Option<String>,
    /// Optionally, the end time of the query
    #[serde(default)]
    pub end_rfc3339: Option<String>,
    /// Optionally, the maximum number of results to return
    #[serde(default)]
    pub limit: Option<i64>,
}

/// `match[]`, `start` and `end` parameters for the label endpoints.
pub(crate) fn label_query(
    matches: &[Selector],
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Vec<(&'static str, String)>> {
    let mut query: Vec<(&'static str, String)> =
        matches.iter().map(|s| ("match[]", s.to_string())).collect();
    if let Some(start) = non_empty(start) {
        query.push(("start", unix_seconds(parse_rfc3339("startRfc3339", start)?)));
    }
    if let Some(end) = non_empty(end) {
        query.push(("end", unix_seconds(parse_rfc3339("endRfc3339", end)?)));
    }
    Ok(query)
}

fn truncate(mut values: Vec<String>, limit: i64) -> Vec<String> {
    values.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    values
}

async fn list_label_names(ctx: ExecutionContext, args: LabelNamesArgs) -> Result<Vec<String>> {
    let limit = count_or("limit", args.limit, 100)?;
    let query = label_query(
        &args.matches,
        args.start_rfc3339.as_deref(),
        args.end_rfc3339.as_deref(),
    )?;
    let client = proxy(&ctx, &args.datasource_uid).await?;
    let names = get_data(&client, "api/v1/labels", &query)
        .await
        .context("list label names")?;
    Ok(truncate(names, limit))
}

async fn list_label_values(ctx: ExecutionContext, args: LabelValuesArgs) -> Result<Vec<String>> {
    require("labelName", &args.label_name)?;
    let limit = count_or("limit", args.limit, 100)?;
    let query = label_query(
        &args.matches,
        args.start_rfc3339.as_deref(),
        args.end_rfc3339.as_deref(),
    )?;
    let client = proxy(&ctx, &args.datasource_uid).await?;
    let values = get_data(
        &client,
        ApiPath::new("api/v1/label")
            .segment(&args.label_name)
            .then("values"),
        &query,
    )
    .await
    .context(format!("list values for label '{}'", args.label_name))?;
    Ok(truncate(values, limit))
}

pub(crate) fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "list_prometheus_metric_metadata",
            "List Prometheus metric metadata",
            "List Prometheus metric metadata. Returns metadata about metrics currently scraped \
             from targets.",
            Effect::Read,
            list_metric_metadata,
        ),
        ToolSpec::new(
            "query_prometheus",
            "Query Prometheus metrics",
            "Query Prometheus using a PromQL expression. Supports both instant queries (at a \
             single point in time) and range queries (over a time range). Time can be specified \
             either in RFC3339 format or as relative time expressions like 'now', 'now-1h', \
             'now-30m', etc.",
            Effect::Read,
            query_prometheus,
        ),
        ToolSpec::new(
            "list_prometheus_metric_names",
            "List Prometheus metric names",
            "List metric names in a Prometheus datasource. Retrieves all metric names and then \
             filters them locally using the provided regex. Supports pagination.",
            Effect::Read,
            list_metric_names,
        ),
        ToolSpec::new(
            "list_prometheus_label_names",
            "List Prometheus label names",
            "List label names in a Prometheus datasource. Allows filtering by series selectors \
             and time range.",
            Effect::Read,
            list_label_names,
        ),
        ToolSpec::new(
            "list_prometheus_label_values",
            "List Prometheus label values",
            "Get the values for a specific label name in Prometheus. Allows filtering by series \
             selectors and time range.",
            Effect::Read,
            list_label_values,
        ),
    ]
}
