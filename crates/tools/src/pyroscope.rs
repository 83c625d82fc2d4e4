//! Pyroscope tools. Querier calls use the Connect JSON protocol through the datasource proxy;
//! rendering uses the HTTP render endpoint. Profiling backends get a shorter timeout and a
//! smaller body cap.

use crate::args::require;
use crate::registry::ToolSpec;
use crate::semantics::Effect;
use crate::timerange::parse_rfc3339;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use mcp_grafana_upstream::{
    AuthenticatedClient, ClientOptions, ExecutionContext, GrafanaError, Result, ResultExt,
    ServiceTarget,
};
use regex::{Captures, Regex};
use reqwest::Method;
use rmcp::schemars;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::LazyLock;

const QUERIER: &str = "querier.v1.QuerierService";
const DEFAULT_MAX_NODE_DEPTH: i64 = 100;
const EMPTY_PROFILE_MARKER: &str = "Showing nodes accounting for 0, 0% of 0 total";

static DOT_CLEANUP: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r##"(?m)(fontsize=\d+ )|(id="node\d+" )|(labeltooltip=".*?\)" )|(tooltip=".*?\)" )|(N\d+ -> N\d+).*|(N\d+ \[label="other.*\n)|(shape=box )|(fillcolor="#\w{6}")|(color="#\w{6}" )"##,
    )
});

async fn pyroscope(ctx: &ExecutionContext, datasource_uid: &str) -> Result<AuthenticatedClient> {
    require("data_source_uid", datasource_uid)?;
    ctx.client_with(
        ServiceTarget::Datasource(datasource_uid),
        ClientOptions::profiling(),
    )
    .await
    .context("failed to create Pyroscope client")
}

async fn querier<T: serde::de::DeserializeOwned>(
    client: &AuthenticatedClient,
    method: &str,
    body: &Value,
) -> Result<T> {
    let request = client
        .request(Method::POST, &format!("{QUERIER}/{method}"))?
        .header("Connect-Protocol-Version", "1")
        .json(body);
    let response = client
        .send(request)
        .await
        .context("failed to call Pyroscope API")?;
    mcp_grafana_upstream::client::decode_json(&response)
}

fn matchers_or_default(matchers: Option<&str>) -> String {
    match matchers.map(str::trim).filter(|m| !m.is_empty()) {
        Some(m) => m.to_string(),
        None => "{}".to_string(),
    }
}

/// Resolve an optional RFC3339 range: end defaults to now, start to an hour before end.
pub(crate) fn time_range(
    start: Option<&str>,
    end: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let parse = |field: &str, raw: Option<&str>| {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| parse_rfc3339(field, s))
            .transpose()
    };
    let end = parse("end_rfc_3339", end)?.unwrap_or(now);
    let start = parse("start_rfc_3339", start)?.unwrap_or(end - Duration::hours(1));
    if start >= end {
        return Err(GrafanaError::argument(format!(
            "start timestamp '{}' must be strictly before end timestamp '{}'",
            start.to_rfc3339_opts(SecondsFormat::Secs, true),
            end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )));
    }
    Ok((start, end))
}

#[derive(Debug, Default, Deserialize)]
struct Names {
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct LabelNamesArgs {
    /// The UID of the datasource to query
    pub data_source_uid: String,
    /// Prometheus style matchers used to filter the result set (defaults to: {})
    #[serde(default)]
    pub matchers: Option<String>,
    /// Optionally, the start time of the query in RFC3339 format (defaults to 1 hour ago)
    #[serde(default)]
    pub start_rfc_3339: Option<String>,
    /// Optionally, the end time of the query in RFC3339 format (defaults to now)
    #[serde(default)]
    pub end_rfc_3339: Option<String>,
}

async fn list_label_names(ctx: ExecutionContext, args: LabelNamesArgs) -> Result<Vec<String>> {
    let (start, end) = time_range(
        args.start_rfc_3339.as_deref(),
        args.end_rfc_3339.as_deref(),
        Utc::now(),
    )?;
    let client = pyroscope(&ctx, &args.data_source_uid).await?;
    let body = json!({
        "matchers": [matchers_or_default(args.matchers.as_deref())],
        "start": start.timestamp_millis(),
        "end": end.timestamp_millis(),
    });
    let names: Names = querier(&client, "LabelNames", &body).await?;
    Ok(names.names)
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct LabelValuesArgs {
    /// The UID of the datasource to query
    pub data_source_uid: String,
    /// A label name
    pub name: String,
    /// Optionally, Prometheus style matchers used to filter the result set (defaults to: {})
    #[serde(default)]
    pub matchers: Option<String>,
    /// Optionally, the start time of the query in RFC3339 format (defaults to 1 hour ago)
    #[serde(default)]
    pub start_rfc_3339: Option<String>,
    /// Optionally, the end time of the query in RFC3339 format (defaults to now)
    #[serde(default)]
    pub end_rfc_3339: Option<String>,
}

async fn list_label_values(ctx: ExecutionContext, args: LabelValuesArgs) -> Result<Vec<String>> {
    let name = args.name.trim();
    require("name", name)?;
    let (start, end) = time_range(
        args.start_rfc_3339.as_deref(),
        args.end_rfc_3339.as_deref(),
        Utc::now(),
    )?;
    let client = pyroscope(&ctx, &args.data_source_uid).await?;
    let body = json!({
        "name": name,
        "matchers": [matchers_or_default(args.matchers.as_deref())],
        "start": start.timestamp_millis(),
        "end": end.timestamp_millis(),
    });
    let names: Names = querier(&client, "LabelValues", &body).await?;
    Ok(names.names)
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct ProfileTypesArgs {
    /// The UID of the datasource to query
    pub data_source_uid: String,
    /// Optionally, the start time of the query in RFC3339 format (defaults to 1 hour ago)
    #[serde(default)]
    pub start_rfc_3339: Option<String>,
    /// Optionally, the end time of the query in RFC3339 format (defaults to now)
    #[serde(default)]
    pub end_rfc_3339: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProfileType {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sample_type: String,
    #[serde(default)]
    pub sample_unit: String,
    #[serde(default)]
    pub period_type: String,
    #[serde(default)]
    pub period_unit: String,
}

impl ProfileType {
    /// `<name>:<sample type>:<sample unit>:<period type>:<period unit>`
    pub(crate) fn id(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.name, self.sample_type, self.sample_unit, self.period_type, self.period_unit
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileTypes {
    #[serde(default)]
    profile_types: Vec<ProfileType>,
}

async fn list_profile_types(
    ctx: ExecutionContext,
    args: ProfileTypesArgs,
) -> Result<Vec<String>> {
    let (start, end) = time_range(
        args.start_rfc_3339.as_deref(),
        args.end_rfc_3339.as_deref(),
        Utc::now(),
    )?;
    let client = pyroscope(&ctx, &args.data_source_uid).await?;
    let body = json!({
        "start": start.timestamp_millis(),
        "end": end.timestamp_millis(),
    });
    let types: ProfileTypes = querier(&client, "ProfileTypes", &body).await?;
    Ok(types.profile_types.iter().map(ProfileType::id).collect())
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct FetchProfileArgs {
    /// The UID of the datasource to query
    pub data_source_uid: String,
    /// Type profile type, use the list_pyroscope_profile_types tool to fetch available profile types
    pub profile_type: String,
    /// Optionally, Prometheus style matchers used to filter the result set (defaults to: {})
    #[serde(default)]
    pub matchers: Option<String>,
    /// Optionally, the maximum depth of nodes in the resulting profile. A value of -1 indicates
    /// an unbounded node depth (default: 100)
    #[serde(default)]
    pub max_node_depth: Option<i64>,
    /// Optionally, the start time of the query in RFC3339 format (defaults to 1 hour ago)
    #[serde(default)]
    pub start_rfc_3339: Option<String>,
    /// Optionally, the end time of the query in RFC3339 format (defaults to now)
    #[serde(default)]
    pub end_rfc_3339: Option<String>,
}

/// Wrap bare matchers in braces.
pub(crate) fn braced_matchers(matchers: Option<&str>) -> String {
    let matchers = matchers_or_default(matchers);
    if matchers.starts_with('{') && matchers.ends_with('}') {
        matchers
    } else {
        format!("{{{matchers}}}")
    }
}

/// Strip styling attributes and edge labels from a DOT profile.
pub(crate) fn cleanup_dot(profile: &str) -> Result<String> {
    let re = DOT_CLEANUP
        .as_ref()
        .map_err(|e| GrafanaError::call(format!("invalid DOT cleanup pattern: {e}")))?;
    Ok(re
        .replace_all(profile, |caps: &Captures<'_>| {
            caps.get(5).map_or_else(String::new, |m| m.as_str().to_string())
        })
        .into_owned())
}

async fn fetch_profile(ctx: ExecutionContext, args: FetchProfileArgs) -> Result<String> {
    require("profile_type", &args.profile_type)?;
    let matchers = braced_matchers(args.matchers.as_deref());
    let max_nodes = match args.max_node_depth {
        None | Some(0) => DEFAULT_MAX_NODE_DEPTH,
        Some(n) => n,
    };
    let (start, end) = time_range(
        args.start_rfc_3339.as_deref(),
        args.end_rfc_3339.as_deref(),
        Utc::now(),
    )?;

    let client = pyroscope(&ctx, &args.data_source_uid).await?;
    let query = [
        ("query", format!("{}{matchers}", args.profile_type)),
        ("from", start.timestamp_millis().to_string()),
        ("until", end.timestamp_millis().to_string()),
        ("format", "dot".to_string()),
        ("max-nodes", max_nodes.to_string()),
    ];
    let profile = client
        .get_text("pyroscope/render", &query)
        .await
        .context("failed to call Pyroscope API")?;
    if profile.is_empty() {
        return Err(GrafanaError::call("Pyroscope API returned an empty response"));
    }
    if profile.contains(EMPTY_PROFILE_MARKER) {
        return Err(GrafanaError::call("Pyroscope API returned an empty profile"));
    }
    cleanup_dot(&profile)
}

pub(crate) fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "grafana_list_pyroscope_label_names",
            "List Pyroscope label names",
            "Lists all available label names (keys) found in profiles within a specified \
             Pyroscope datasource, time range, and optional label matchers. Label matchers are \
             typically used to qualify a service name ({service_name=\"foo\"}). Label names with \
             double underscores (e.g. __name__) are internal and rarely useful to users. If the \
             time range is not provided, it defaults to the last hour.",
            Effect::Read,
            list_label_names,
        ),
        ToolSpec::new(
            "grafana_list_pyroscope_label_values",
            "List Pyroscope label values",
            "Lists all available label values for a particular label name found in profiles \
             within a specified Pyroscope datasource, time range, and optional label matchers. \
             If the time range is not provided, it defaults to the last hour.",
            Effect::Read,
            list_label_values,
        ),
        ToolSpec::new(
            "grafana_list_pyroscope_profile_types",
            "List Pyroscope profile types",
            "Lists all available profile types available in a specified Pyroscope datasource and \
             time range (example profile type: \"process_cpu:cpu:nanoseconds:cpu:nanoseconds\"). \
             A profile type has the following structure: <name>:<sample type>:<sample \
             unit>:<period type>:<period unit>. If the time range is not provided, it defaults \
             to the last hour.",
            Effect::Read,
            list_profile_types,
        ),
        ToolSpec::new(
            "fetch_pyroscope_profile",
            "Fetch Pyroscope profile",
            "Fetches a profile from a Pyroscope data source for a given time range. By default, \
             the time range is the past 1 hour. The profile type is required. Matchers are not \
             required, but highly recommended, they are generally used to select an application \
             by the service_name label (e.g. {service_name=\"foo\"}). The returned profile is in \
             DOT format.",
            Effect::Read,
            fetch_profile,
        ),
    ]
}
