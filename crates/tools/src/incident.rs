//! Incident tools. The incident service speaks an RPC-over-HTTP dialect: every call is a
//! `POST {root}/{Service}.{Method}` with a JSON body.

use crate::args::{count_or, non_empty, require};
use crate::registry::ToolSpec;
use crate::semantics::Effect;
use mcp_grafana_upstream::{
    AuthenticatedClient, ExecutionContext, GrafanaError, Result, ResultExt, ServiceTarget,
};
use rmcp::schemars;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const DEFAULT_LIMIT: i64 = 10;

async fn rpc(client: &AuthenticatedClient, method: &str, body: &Value) -> Result<Value> {
    let response: Value = client.post_json(method, body).await?;
    if let Some(error) = response
        .get("error")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
    {
        return Err(GrafanaError::call(format!("{method}: {error}")));
    }
    Ok(response)
}

fn field(mut response: Value, name: &str) -> Value {
    response
        .get_mut(name)
        .map(Value::take)
        .unwrap_or(Value::Null)
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub(crate) struct ListIncidentsArgs {
    /// The maximum number of incidents to return
    #[serde(default)]
    pub limit: Option<i64>,
    /// Whether to include drill incidents
    #[serde(default)]
    pub drill: bool,
    /// The status of the incidents to include. Valid values: 'active', 'resolved'
    #[serde(default)]
    pub status: Option<String>,
}

pub(crate) fn query_string(drill: bool, status: Option<&str>) -> String {
    let mut query = String::new();
    if !drill {
        query.push_str("isdrill:false");
    }
    if let Some(status) = non_empty(status) {
        if !query.is_empty() {
            query.push_str(" and ");
        }
        query.push_str("status:");
        query.push_str(status);
    }
    query
}

async fn list_incidents(ctx: ExecutionContext, args: ListIncidentsArgs) -> Result<Value> {
    let limit = count_or("limit", args.limit, DEFAULT_LIMIT)?;
    let client = ctx.client(ServiceTarget::Incident).await?;
    let body = json!({
        "query": {
            "limit": limit,
            "orderDirection": "DESC",
            "queryString": query_string(args.drill, args.status.as_deref()),
        }
    });
    rpc(&client, "IncidentsService.QueryIncidentPreviews", &body)
        .await
        .context("list incidents")
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub(crate) struct GetIncidentArgs {
    /// The ID of the incident to retrieve
    pub id: String,
}

async fn get_incident(ctx: ExecutionContext, args: GetIncidentArgs) -> Result<Value> {
    require("id", &args.id)?;
    let client = ctx.client(ServiceTarget::Incident).await?;
    let response = rpc(
        &client,
        "IncidentsService.GetIncident",
        &json!({ "incidentID": args.id }),
    )
    .await
    .context(format!("get incident {}", args.id))?;
    Ok(field(response, "incident"))
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IncidentLabel {
    /// The label text
    pub label: String,
    /// Optional label key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional hex color, e.g. '#ff0000'
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_hex: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateIncidentArgs {
    /// The title of the incident
    pub title: String,
    /// The severity of the incident
    #[serde(default)]
    pub severity: String,
    /// The prefix of the room to create the incident in
    #[serde(default)]
    pub room_prefix: String,
    /// Whether the incident is a drill incident
    #[serde(default)]
    pub is_drill: bool,
    /// The status of the incident
    #[serde(default)]
    pub status: String,
    /// The caption of the attachment
    #[serde(default)]
    pub attach_caption: Option<String>,
    /// The URL of the attachment
    #[serde(default)]
    pub attach_url: Option<String>,
    /// The labels to add to the incident
    #[serde(default)]
    pub labels: Vec<IncidentLabel>,
}

pub(crate) fn create_request(args: CreateIncidentArgs) -> Value {
    json!({
        "title": args.title,
        "severity": args.severity,
        "roomPrefix": args.room_prefix,
        "isDrill": args.is_drill,
        "status": args.status,
        "attachCaption": args.attach_caption.unwrap_or_default(),
        "attachURL": args.attach_url.unwrap_or_default(),
        "labels": args.labels,
    })
}

async fn create_incident(ctx: ExecutionContext, args: CreateIncidentArgs) -> Result<Value> {
    require("title", &args.title)?;
    let client = ctx.client(ServiceTarget::Incident).await?;
    let response = rpc(&client, "IncidentsService.CreateIncident", &create_request(args))
        .await
        .context("create incident")?;
    Ok(field(response, "incident"))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddActivityArgs {
    /// The ID of the incident to add the activity to
    pub incident_id: String,
    /// The body of the activity. URLs will be parsed and attached as context
    pub body: String,
    /// The time that the activity occurred. If not provided, the current time will be used
    #[serde(default)]
    pub event_time: Option<String>,
}

async fn add_activity(ctx: ExecutionContext, args: AddActivityArgs) -> Result<Value> {
    require("incidentId", &args.incident_id)?;
    require("body", &args.body)?;
    let client = ctx.client(ServiceTarget::Incident).await?;
    let mut body = json!({
        "incidentID": args.incident_id,
        "activityKind": "userNote",
        "body": args.body,
    });
    if let Some(event_time) = non_empty(args.event_time.as_deref()) {
        body["eventTime"] = json!(event_time);
    }
    let response = rpc(&client, "ActivityService.AddActivity", &body)
        .await
        .context(format!("add activity to incident {}", args.incident_id))?;
    Ok(field(response, "activityItem"))
}

pub(crate) fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "list_incidents",
            "List incidents",
            "List Grafana incidents. Allows filtering by status ('active', 'resolved') and \
             optionally including drill incidents. Returns a preview list with basic details.",
            Effect::Read,
            list_incidents,
        ),
        ToolSpec::new(
            "create_incident",
            "Create incident",
            "Create a new Grafana incident. Requires title, severity, and room prefix. Allows \
             setting status and labels. This tool should be used judiciously and sparingly, and \
             only after confirmation from the user, as it may notify or alarm lots of people.",
            Effect::Create,
            create_incident,
        ),
        ToolSpec::new(
            "add_activity_to_incident",
            "Add activity to incident",
            "Add a note (userNote activity) to an existing incident's timeline using its ID. \
             The note body can include URLs which will be attached as context. Use this to add \
             context to an incident.",
            Effect::Create,
            add_activity,
        ),
        ToolSpec::new(
            "get_incident",
            "Get incident details",
            "Get a single incident by ID. Returns the full incident details including title, \
             status, severity, labels, timestamps, and other metadata.",
            Effect::Read,
            get_incident,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_excludes_drills_unless_asked() {
        assert_eq!(query_string(false, None), "isdrill:false");
        assert_eq!(
            query_string(false, Some("active")),
            "isdrill:false and status:active"
        );
        assert_eq!(query_string(true, Some("resolved")), "status:resolved");
        assert_eq!(query_string(true, Some("")), "");
    }

    #[test]
    fn create_request_uses_service_field_names() {
        let args: CreateIncidentArgs = serde_json::from_value(json!({
            "title": "DB down",
            "severity": "critical",
            "roomPrefix": "inc",
            "attachUrl": "https://example.com/runbook",
            "labels": [{"label": "db"}]
        }))
        .expect("args");
        let body = create_request(args);
        assert_eq!(body["attachURL"], json!("https://example.com/runbook"));
        assert_eq!(body["labels"], json!([{"label": "db"}]));
        assert_eq!(body["isDrill"], json!(false));
    }
}
