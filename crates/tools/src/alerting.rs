use crate::args::{paginate, require};
use crate::registry::ToolSpec;
use crate::selector::Selector;
use crate::semantics::Effect;
use mcp_grafana_upstream::{
    ApiPath, ExecutionContext, GrafanaError, Result, ResultExt, ServiceTarget,
};
use rmcp::schemars;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const DEFAULT_ALERT_RULES_LIMIT: i64 = 100;
const DEFAULT_CONTACT_POINTS_LIMIT: i64 = 100;

fn positive_or(field: &str, value: Option<i64>, default: i64) -> Result<i64> {
    match value {
        Some(v) if v < 0 => Err(GrafanaError::argument(format!(
            "invalid {field}: {v}, must be greater than 0"
        ))),
        Some(0) | None => Ok(default),
        Some(v) => Ok(v),
    }
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub(crate) struct ListAlertRulesArgs {
    /// The maximum number of results to return. Default is 100.
    #[serde(default)]
    pub limit: Option<i64>,
    /// The page number to return.
    #[serde(default)]
    pub page: Option<i64>,
    /// Optionally, a list of matchers to filter alert rules by labels
    #[serde(default)]
    pub label_selectors: Vec<Selector>,
}

#[derive(Debug, Default, Deserialize)]
struct RulesResponse {
    #[serde(default)]
    data: RulesData,
}

#[derive(Debug, Default, Deserialize)]
struct RulesData {
    #[serde(default)]
    groups: Vec<RuleGroup>,
}

#[derive(Debug, Deserialize)]
struct RuleGroup {
    #[serde(default)]
    rules: Vec<AlertingRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AlertingRule {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub(crate) struct AlertRuleSummary {
    pub uid: String,
    pub title: String,
    pub state: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Keep rules matching every selector, then take one page.
pub(crate) fn select_rules(
    rules: Vec<AlertingRule>,
    selectors: &[Selector],
    limit: i64,
    page: i64,
) -> Result<Vec<AlertRuleSummary>> {
    let mut kept = Vec::with_capacity(rules.len());
    'rules: for rule in rules {
        for selector in selectors {
            if !selector.matches(&rule.labels)? {
                continue 'rules;
            }
        }
        kept.push(rule);
    }
    Ok(paginate(kept, limit, page)
        .into_iter()
        .map(|r| AlertRuleSummary {
            uid: r.uid,
            title: r.name,
            state: r.state,
            labels: r.labels,
        })
        .collect())
}

async fn list_alert_rules(
    ctx: ExecutionContext,
    args: ListAlertRulesArgs,
) -> Result<Vec<AlertRuleSummary>> {
    let limit = positive_or("limit", args.limit, DEFAULT_ALERT_RULES_LIMIT)
        .context("list alert rules")?;
    let page = positive_or("page", args.page, 1).context("list alert rules")?;

    // The Prometheus-compatible rules API lives beside the platform API, not under it.
    let client = ctx.client(ServiceTarget::Api).await?;
    let response: RulesResponse = client
        .get_json("prometheus/grafana/api/v1/rules", &[])
        .await
        .context("list alert rules")?;
    let rules = response
        .data
        .groups
        .into_iter()
        .flat_map(|g| g.rules)
        .collect();
    select_rules(rules, &args.label_selectors, limit, page).context("list alert rules")
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct GetAlertRuleArgs {
    /// The uid of the alert rule
    pub uid: String,
}

async fn get_alert_rule_by_uid(ctx: ExecutionContext, args: GetAlertRuleArgs) -> Result<Value> {
    require("uid", &args.uid).context("get alert rule by uid")?;
    let client = ctx.client(ServiceTarget::Api).await?;
    client
        .get_json(
            ApiPath::new("v1/provisioning/alert-rules").segment(&args.uid),
            &[],
        )
        .await
        .context(format!("get alert rule by uid {}", args.uid))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct ListContactPointsArgs {
    /// The maximum number of results to return. Default is 100.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Filter contact points by name
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct ContactPointSummary {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

async fn list_contact_points(
    ctx: ExecutionContext,
    args: ListContactPointsArgs,
) -> Result<Vec<ContactPointSummary>> {
    let limit = positive_or("limit", args.limit, DEFAULT_CONTACT_POINTS_LIMIT)
        .context("list contact points")?;
    let query: Vec<(&str, String)> = args.name.map(|n| ("name", n)).into_iter().collect();
    let client = ctx.client(ServiceTarget::Api).await?;
    let mut points: Vec<ContactPointSummary> = client
        .get_json("v1/provisioning/contact-points", &query)
        .await
        .context("list contact points")?;
    points.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    Ok(points)
}

pub(crate) fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "list_alert_rules",
            "List alert rules",
            "Lists Grafana alert rules, returning a summary including UID, title, current state \
             (e.g., 'pending', 'firing', 'inactive'), and labels. Supports filtering by labels \
             using selectors and pagination. Example label selector: `[{'name': 'severity', \
             'type': '=', 'value': 'critical'}]`. Inactive state means the alert state is \
             normal, not firing",
            Effect::Read,
            list_alert_rules,
        ),
        ToolSpec::new(
            "get_alert_rule_by_uid",
            "Get alert rule details",
            "Retrieves the full configuration and detailed status of a specific Grafana alert \
             rule identified by its unique ID (UID).",
            Effect::Read,
            get_alert_rule_by_uid,
        ),
        ToolSpec::new(
            "list_contact_points",
            "List notification contact points",
            "Lists Grafana notification contact points, returning a summary including UID, \
             name, and type for each. Supports filtering by name - exact match - and limiting \
             the number of results.",
            Effect::Read,
            list_contact_points,
        ),
    ]
}
