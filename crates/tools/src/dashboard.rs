use crate::args::require;
use crate::registry::ToolSpec;
use crate::semantics::Effect;
use mcp_grafana_upstream::{
    ApiPath, ExecutionContext, GrafanaError, Result, ResultExt, ServiceTarget,
};
use rmcp::schemars;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct DashboardUidArgs {
    /// The UID of the dashboard
    pub uid: String,
}

async fn fetch_dashboard(ctx: &ExecutionContext, uid: &str) -> Result<Value> {
    require("uid", uid)?;
    let client = ctx.client(ServiceTarget::Api).await?;
    client
        .get_json(ApiPath::new("dashboards/uid").segment(uid), &[])
        .await
        .context(format!("get dashboard by uid {uid}"))
}

async fn get_dashboard_by_uid(ctx: ExecutionContext, args: DashboardUidArgs) -> Result<Value> {
    fetch_dashboard(&ctx, &args.uid).await
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateDashboardArgs {
    /// The full dashboard JSON
    pub dashboard: Map<String, Value>,
    /// The UID of the dashboard's folder
    #[serde(default)]
    pub folder_uid: Option<String>,
    /// Set a commit message for the version history
    #[serde(default)]
    pub message: Option<String>,
    /// Overwrite the dashboard if it exists. Otherwise create one
    #[serde(default)]
    pub overwrite: bool,
    /// ID of the user making the change
    #[serde(default)]
    pub user_id: Option<i64>,
}

pub(crate) fn save_command(args: UpdateDashboardArgs) -> Value {
    let mut cmd = json!({
        "dashboard": args.dashboard,
        "overwrite": args.overwrite,
    });
    if let Some(folder_uid) = args.folder_uid.filter(|s| !s.is_empty()) {
        cmd["folderUid"] = json!(folder_uid);
    }
    if let Some(message) = args.message.filter(|s| !s.is_empty()) {
        cmd["message"] = json!(message);
    }
    if let Some(user_id) = args.user_id {
        cmd["userId"] = json!(user_id);
    }
    cmd
}

async fn update_dashboard(ctx: ExecutionContext, args: UpdateDashboardArgs) -> Result<Value> {
    let client = ctx.client(ServiceTarget::Api).await?;
    client
        .post_json("dashboards/db", &save_command(args))
        .await
        .context("unable to save dashboard")
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub(crate) struct DatasourceRef {
    pub uid: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub(crate) struct PanelQuery {
    pub title: String,
    pub query: String,
    pub datasource: DatasourceRef,
}

/// Collect every non-empty `expr` target from the top-level panels.
pub(crate) fn panel_queries(response: &Value) -> Result<Vec<PanelQuery>> {
    let dashboard = response
        .get("dashboard")
        .and_then(Value::as_object)
        .ok_or_else(|| GrafanaError::call("dashboard is not a JSON object"))?;
    let panels = dashboard
        .get("panels")
        .and_then(Value::as_array)
        .ok_or_else(|| GrafanaError::call("panels is not a JSON array"))?;

    let str_at = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let mut out = Vec::new();
    for panel in panels.iter().filter(|p| p.is_object()) {
        let title = str_at(panel, "title");
        let datasource = panel
            .get("datasource")
            .filter(|d| d.is_object())
            .map(|d| DatasourceRef {
                uid: str_at(d, "uid"),
                kind: str_at(d, "type"),
            })
            .unwrap_or_default();
        let Some(targets) = panel.get("targets").and_then(Value::as_array) else {
            continue;
        };
        for expr in targets.iter().map(|t| str_at(t, "expr")) {
            if expr.is_empty() {
                continue;
            }
            out.push(PanelQuery {
                title: title.clone(),
                query: expr,
                datasource: DatasourceRef {
                    uid: datasource.uid.clone(),
                    kind: datasource.kind.clone(),
                },
            });
        }
    }
    Ok(out)
}

async fn get_dashboard_panel_queries(
    ctx: ExecutionContext,
    args: DashboardUidArgs,
) -> Result<Vec<PanelQuery>> {
    let response = fetch_dashboard(&ctx, &args.uid).await?;
    panel_queries(&response)
}

pub(crate) fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "grafana_get_dashboard_by_uid",
            "Get dashboard details",
            "Retrieves the complete dashboard, including panels, variables, and settings, for a \
             specific dashboard identified by its UID.",
            Effect::Read,
            get_dashboard_by_uid,
        ),
        ToolSpec::new(
            "grafana_update_dashboard",
            "Create or update dashboard",
            "Create or update a dashboard",
            Effect::Replace,
            update_dashboard,
        ),
        ToolSpec::new(
            "grafana_get_dashboard_panel_queries",
            "Get dashboard panel queries",
            "Get the title, query string, and datasource information for each panel in a \
             dashboard. The datasource is an object with fields `uid` (which may be a concrete \
             UID or a template variable like \"$datasource\") and `type`. If the datasource UID \
             is a template variable, it won't be usable directly for queries. Returns an array \
             of objects, each representing a panel, with fields: title, query, and datasource \
             (an object with uid and type).",
            Effect::Read,
            get_dashboard_panel_queries,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_queries_skip_panels_without_expressions() {
        let response = json!({
            "dashboard": {
                "panels": [
                    {
                        "title": "CPU",
                        "datasource": {"uid": "prom", "type": "prometheus"},
                        "targets": [{"expr": "rate(cpu[5m])"}, {"expr": ""}, {"refId": "B"}]
                    },
                    {"title": "Text", "type": "text"},
                    "not a panel",
                    {"title": "Templated", "datasource": {"uid": "$ds"}, "targets": [{"expr": "up"}]}
                ]
            },
            "meta": {}
        });
        let queries = panel_queries(&response).expect("queries");
        assert_eq!(
            queries,
            vec![
                PanelQuery {
                    title: "CPU".to_string(),
                    query: "rate(cpu[5m])".to_string(),
                    datasource: DatasourceRef {
                        uid: "prom".to_string(),
                        kind: "prometheus".to_string()
                    },
                },
                PanelQuery {
                    title: "Templated".to_string(),
                    query: "up".to_string(),
                    datasource: DatasourceRef {
                        uid: "$ds".to_string(),
                        kind: String::new()
                    },
                },
            ]
        );
    }

    #[test]
    fn malformed_dashboards_are_rejected() {
        assert!(panel_queries(&json!({"dashboard": "nope"})).is_err());
        assert!(panel_queries(&json!({"dashboard": {"panels": {}}})).is_err());
        assert!(
            panel_queries(&json!({"dashboard": {"panels": []}}))
                .expect("empty")
                .is_empty()
        );
    }

    #[test]
    fn save_command_omits_unset_fields() {
        let args: UpdateDashboardArgs = serde_json::from_value(json!({
            "dashboard": {"title": "New"},
            "folderUid": "",
            "message": "init"
        }))
        .expect("args");
        assert_eq!(
            save_command(args),
            json!({"dashboard": {"title": "New"}, "overwrite": false, "message": "init"})
        );
    }
}
