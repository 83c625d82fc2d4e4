//! Loki tools, reached through the Grafana datasource proxy.

use crate::args::{count_or, non_empty, require};
use crate::envelope::{success_data, success_data_or_default};
use crate::registry::ToolSpec;
use crate::semantics::Effect;
use crate::timerange::rfc3339_or;
use chrono::{DateTime, Duration, Utc};
use mcp_grafana_upstream::client::decode_json;
use mcp_grafana_upstream::{
    ApiPath, AuthenticatedClient, ExecutionContext, GrafanaError, Result, ResultExt,
    ServiceTarget,
};
use reqwest::Method;
use rmcp::schemars;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const SERVICE: &str = "Loki";
const DEFAULT_LOG_LIMIT: i64 = 10;
const MAX_LOG_LIMIT: i64 = 100;

async fn proxy(ctx: &ExecutionContext, datasource_uid: &str) -> Result<AuthenticatedClient> {
    require("datasourceUid", datasource_uid)?;
    ctx.client(ServiceTarget::Datasource(datasource_uid))
        .await
        .context("creating Loki client")
}

/// GET a Loki endpoint and decode its JSON body. An empty body is an error.
async fn fetch<T: DeserializeOwned>(
    client: &AuthenticatedClient,
    path: impl Into<ApiPath>,
    query: &[(&str, String)],
) -> Result<T> {
    let request = client.request(Method::GET, path)?.query(query);
    let body = client.send(request).await?;
    if body.trim_ascii().is_empty() {
        return Err(GrafanaError::call(format!("empty response from {SERVICE} API")));
    }
    decode_json(&body)
}

fn unix_nanos(field: &str, t: DateTime<Utc>) -> Result<String> {
    t.timestamp_nanos_opt()
        .map(|n| n.to_string())
        .ok_or_else(|| GrafanaError::argument(format!("{field} is out of range")))
}

/// `start` and `end` in Unix nanoseconds, defaulting to the last hour.
pub(crate) fn time_range(
    start: Option<&str>,
    end: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<(&'static str, String)>> {
    let start = rfc3339_or("startRfc3339", start, now - Duration::hours(1))?;
    let end = rfc3339_or("endRfc3339", end, now)?;
    Ok(vec![
        ("start", unix_nanos("startRfc3339", start)?),
        ("end", unix_nanos("endRfc3339", end)?),
    ])
}

fn raw_range(start: Option<&str>, end: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(start) = non_empty(start) {
        query.push(("start", start.to_string()));
    }
    if let Some(end) = non_empty(end) {
        query.push(("end", end.to_string()));
    }
    query
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LabelNamesArgs {
    /// The UID of the datasource to query
    pub datasource_uid: String,
    /// Optionally, the start time of the query in RFC3339 format (defaults to 1 hour ago)
    #[serde(default)]
    pub start_rfc3339: Option<String>,
    /// Optionally, the end time of the query in RFC3339 format (defaults to now)
    #[serde(default)]
    pub end_rfc3339: Option<String>,
}

async fn list_label_names(ctx: ExecutionContext, args: LabelNamesArgs) -> Result<Vec<String>> {
    let client = proxy(&ctx, &args.datasource_uid).await?;
    let query = raw_range(args.start_rfc3339.as_deref(), args.end_rfc3339.as_deref());
    let body: Value = fetch(&client, "loki/api/v1/labels", &query).await?;
    success_data_or_default(SERVICE, body)
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LabelValuesArgs {
    /// The UID of the datasource to query
    pub datasource_uid: String,
    /// The name of the label to retrieve values for (e.g. 'app', 'env', 'pod')
    pub label_name: String,
    /// Optionally, the start time of the query in RFC3339 format (defaults to 1 hour ago)
    #[serde(default)]
    pub start_rfc3339: Option<String>,
    /// Optionally, the end time of the query in RFC3339 format (defaults to now)
    #[serde(default)]
    pub end_rfc3339: Option<String>,
}

async fn list_label_values(ctx: ExecutionContext, args: LabelValuesArgs) -> Result<Vec<String>> {
    require("labelName", &args.label_name)?;
    let client = proxy(&ctx, &args.datasource_uid).await?;
    let query = raw_range(args.start_rfc3339.as_deref(), args.end_rfc3339.as_deref());
    let path = ApiPath::new("loki/api/v1/label")
        .segment(&args.label_name)
        .then("values");
    let body: Value = fetch(&client, path, &query).await?;
    success_data_or_default(SERVICE, body)
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryLogsArgs {
    /// The UID of the datasource to query
    pub datasource_uid: String,
    /// The LogQL query to execute against Loki. This can be a simple label matcher or a
    /// complex query with filters, parsers, and expressions.
    pub logql: String,
    /// Optionally, the start time of the query in RFC3339 format
    #[serde(default)]
    pub start_rfc3339: Option<String>,
    /// Optionally, the end time of the query in RFC3339 format
    #[serde(default)]
    pub end_rfc3339: Option<String>,
    /// Optionally, the maximum number of log lines to return (default: 10, max: 100)
    #[serde(default)]
    pub limit: Option<i64>,
    /// Optionally, the direction of the query: 'forward' (oldest first) or 'backward' (newest first, default)
    #[serde(default)]
    pub direction: Option<String>,
}

pub(crate) fn log_limit(requested: Option<i64>) -> Result<i64> {
    Ok(count_or("limit", requested, DEFAULT_LOG_LIMIT)?.min(MAX_LOG_LIMIT))
}

#[derive(Debug, Default, Deserialize)]
struct Streams {
    #[serde(default)]
    result: Vec<LogStream>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogStream {
    #[serde(default)]
    stream: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, PartialEq, Serialize)]
pub(crate) struct LogEntry {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub labels: BTreeMap<String, String>,
}

fn metric_value(raw: &Value) -> Option<f64> {
    match raw {
        Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}

/// Flatten streams into entries. Metric streams carry numeric values; unparseable samples
/// are skipped.
pub(crate) fn log_entries(streams: Vec<LogStream>) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    for stream in streams {
        let is_metric = stream.stream.get("__type__").is_some_and(|t| t == "metrics");
        for sample in &stream.values {
            let [ts, raw, ..] = sample.as_slice() else {
                continue;
            };
            let timestamp = match ts {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let (line, value) = if is_metric {
                match metric_value(raw) {
                    Some(v) => (None, Some(v)),
                    None => continue,
                }
            } else {
                match raw.as_str() {
                    Some(line) => (Some(line.to_string()), None),
                    None => continue,
                }
            };
            entries.push(LogEntry {
                timestamp,
                line,
                value,
                labels: stream.stream.clone(),
            });
        }
    }
    entries
}

async fn query_logs(ctx: ExecutionContext, args: QueryLogsArgs) -> Result<Vec<LogEntry>> {
    require("logql", &args.logql)?;
    let limit = log_limit(args.limit)?;
    let mut query = vec![("query", args.logql.clone())];
    query.extend(time_range(
        args.start_rfc3339.as_deref(),
        args.end_rfc3339.as_deref(),
        Utc::now(),
    )?);
    query.push(("limit", limit.to_string()));
    let direction = non_empty(args.direction.as_deref()).unwrap_or("backward");
    query.push(("direction", direction.to_string()));

    let client = proxy(&ctx, &args.datasource_uid).await?;
    let body: Value = fetch(&client, "loki/api/v1/query_range", &query).await?;
    let streams: Streams = success_data(SERVICE, body)?;
    Ok(log_entries(streams.result))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryStatsArgs {
    /// The UID of the datasource to query
    pub datasource_uid: String,
    /// The LogQL matcher expression to execute. Only simple label selectors are supported.
    pub logql: String,
    /// Optionally, the start time of the query in RFC3339 format
    #[serde(default)]
    pub start_rfc3339: Option<String>,
    /// Optionally, the end time of the query in RFC3339 format
    #[serde(default)]
    pub end_rfc3339: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub(crate) struct Stats {
    #[serde(default)]
    pub streams: u64,
    #[serde(default)]
    pub chunks: u64,
    #[serde(default)]
    pub entries: u64,
    #[serde(default)]
    pub bytes: u64,
}

async fn query_stats(ctx: ExecutionContext, args: QueryStatsArgs) -> Result<Stats> {
    require("logql", &args.logql)?;
    let mut query = vec![("query", args.logql.clone())];
    query.extend(time_range(
        args.start_rfc3339.as_deref(),
        args.end_rfc3339.as_deref(),
        Utc::now(),
    )?);
    let client = proxy(&ctx, &args.datasource_uid).await?;
    fetch(&client, "loki/api/v1/index/stats", &query).await
}

pub(crate) fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "grafana_list_loki_label_names",
            "List Loki label names",
            "Lists all available label names (keys) found in logs within a specified Loki \
             datasource and time range. Returns a list of unique label strings (e.g., \
             `[\"app\", \"env\", \"pod\"]`). If the time range is not provided, it defaults to \
             the last hour.",
            Effect::Read,
            list_label_names,
        ),
        ToolSpec::new(
            "grafana_list_loki_label_values",
            "List Loki label values",
            "Retrieves all unique values associated with a specific `labelName` within a Loki \
             datasource and time range. Useful for discovering filter options. Defaults to the \
             last hour if the time range is omitted.",
            Effect::Read,
            list_label_values,
        ),
        ToolSpec::new(
            "grafana_query_loki_logs",
            "Query Loki logs",
            "Executes a LogQL query against a Loki datasource to retrieve log entries or metric \
             values. Returns a list of results, each containing a timestamp, labels, and either \
             a log line (`line`) or a numeric metric value (`value`). Defaults to the last \
             hour, a limit of 10 entries, and 'backward' direction (newest first).",
            Effect::Read,
            query_logs,
        ),
        ToolSpec::new(
            "grafana_query_loki_stats",
            "Get Loki log statistics",
            "Retrieves statistics about log streams matching a given LogQL *selector* within a \
             Loki datasource and time range. Returns an object containing the count of \
             streams, chunks, entries, and total bytes. The `logql` parameter must be a simple \
             label selector. Defaults to the last hour if the time range is omitted.",
            Effect::Read,
            query_stats,
        ),
    ]
}
