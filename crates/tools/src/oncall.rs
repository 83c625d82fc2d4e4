//! On-call tools. The on-call API root is discovered per call from the IRM plugin settings.

use crate::args::{count_or, non_empty, require};
use crate::registry::ToolSpec;
use crate::semantics::Effect;
use mcp_grafana_upstream::{
    ApiPath, AuthenticatedClient, ExecutionContext, Result, ResultExt, ServiceTarget,
};
use rmcp::schemars;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

async fn oncall(ctx: &ExecutionContext) -> Result<AuthenticatedClient> {
    ctx.client(ServiceTarget::OnCall)
        .await
        .context("getting OnCall client")
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

fn page_query(page: i64) -> Vec<(&'static str, String)> {
    if page > 0 {
        vec![("page", page.to_string())]
    } else {
        Vec::new()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Schedule {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    team_id: Option<String>,
    #[serde(default)]
    time_zone: Option<String>,
    #[serde(default)]
    shifts: Option<Vec<String>>,
    #[serde(default)]
    on_call_now: Vec<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScheduleSummary {
    pub id: String,
    pub name: String,
    pub team_id: String,
    pub timezone: String,
    pub shifts: Vec<String>,
}

impl From<Schedule> for ScheduleSummary {
    fn from(s: Schedule) -> Self {
        Self {
            id: s.id,
            name: s.name,
            team_id: s.team_id.unwrap_or_default(),
            timezone: s.time_zone.unwrap_or_default(),
            shifts: s.shifts.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListSchedulesArgs {
    /// The ID of the team to list schedules for
    #[serde(default)]
    pub team_id: Option<String>,
    /// The ID of the schedule to get details for. If provided, returns only that schedule's details
    #[serde(default)]
    pub schedule_id: Option<String>,
    /// The page number to return (1-based)
    #[serde(default)]
    pub page: Option<i64>,
}

async fn list_schedules(
    ctx: ExecutionContext,
    args: ListSchedulesArgs,
) -> Result<Vec<ScheduleSummary>> {
    let page = count_or("page", args.page, 0)?;
    let client = oncall(&ctx).await?;

    if let Some(id) = non_empty(args.schedule_id.as_deref()) {
        let schedule: Schedule = client
            .get_json(ApiPath::new("api/v1/schedules").segment(id).trailing_slash(), &[])
            .await
            .context(format!("getting OnCall schedule {id}"))?;
        return Ok(vec![schedule.into()]);
    }

    let mut query = page_query(page);
    if let Some(team_id) = non_empty(args.team_id.as_deref()) {
        query.push(("team_id", team_id.to_string()));
    }
    let response: Page<Schedule> = client
        .get_json("api/v1/schedules/", &query)
        .await
        .context("listing OnCall schedules")?;
    Ok(response.results.into_iter().map(Into::into).collect())
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetShiftArgs {
    /// The ID of the shift to get details for
    pub shift_id: String,
}

async fn get_shift(ctx: ExecutionContext, args: GetShiftArgs) -> Result<Value> {
    require("shiftId", &args.shift_id)?;
    let client = oncall(&ctx).await?;
    client
        .get_json(
            ApiPath::new("api/v1/on_call_shifts")
                .segment(&args.shift_id)
                .trailing_slash(),
            &[],
        )
        .await
        .context(format!("getting OnCall shift {}", args.shift_id))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CurrentUsersArgs {
    /// The ID of the schedule to get current on-call users for
    pub schedule_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CurrentOnCallUsers {
    pub schedule_id: String,
    pub schedule_name: String,
    pub users: Vec<Value>,
}

async fn current_users(ctx: ExecutionContext, args: CurrentUsersArgs) -> Result<CurrentOnCallUsers> {
    require("scheduleId", &args.schedule_id)?;
    let client = oncall(&ctx).await?;
    let schedule: Schedule = client
        .get_json(
            ApiPath::new("api/v1/schedules")
                .segment(&args.schedule_id)
                .trailing_slash(),
            &[],
        )
        .await
        .context(format!("getting schedule {}", args.schedule_id))?;

    let mut users = Vec::with_capacity(schedule.on_call_now.len());
    for user_id in &schedule.on_call_now {
        match client
            .get_json::<Value>(
                ApiPath::new("api/v1/users").segment(user_id).trailing_slash(),
                &[],
            )
            .await
        {
            Ok(user) => users.push(user),
            // A user that cannot be fetched is left out of the result.
            Err(e) => warn!(user_id = %user_id, error = %e, "failed to fetch on-call user"),
        }
    }
    Ok(CurrentOnCallUsers {
        schedule_id: schedule.id,
        schedule_name: schedule.name,
        users,
    })
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub(crate) struct ListTeamsArgs {
    /// The page number to return
    #[serde(default)]
    pub page: Option<i64>,
}

async fn list_teams(ctx: ExecutionContext, args: ListTeamsArgs) -> Result<Vec<Value>> {
    let page = count_or("page", args.page, 0)?;
    let client = oncall(&ctx).await?;
    let response: Page<Value> = client
        .get_json("api/v1/teams/", &page_query(page))
        .await
        .context("listing OnCall teams")?;
    Ok(response.results)
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListUsersArgs {
    /// The ID of the user to get details for. If provided, returns only that user's details
    #[serde(default)]
    pub user_id: Option<String>,
    /// The username to filter users by. If provided, returns only the user matching this username
    #[serde(default)]
    pub username: Option<String>,
    /// The page number to return
    #[serde(default)]
    pub page: Option<i64>,
}

async fn list_users(ctx: ExecutionContext, args: ListUsersArgs) -> Result<Vec<Value>> {
    let page = count_or("page", args.page, 0)?;
    let client = oncall(&ctx).await?;

    if let Some(id) = non_empty(args.user_id.as_deref()) {
        let user: Value = client
            .get_json(ApiPath::new("api/v1/users").segment(id).trailing_slash(), &[])
            .await
            .context(format!("getting OnCall user {id}"))?;
        return Ok(vec![user]);
    }

    let mut query = page_query(page);
    if let Some(username) = non_empty(args.username.as_deref()) {
        query.push(("username", username.to_string()));
    }
    let response: Page<Value> = client
        .get_json("api/v1/users/", &query)
        .await
        .context("listing OnCall users")?;
    Ok(response.results)
}

pub(crate) fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "list_oncall_schedules",
            "List OnCall schedules",
            "List Grafana OnCall schedules, optionally filtering by team ID. If a specific \
             schedule ID is provided, retrieves details for only that schedule. Returns a list \
             of schedule summaries including ID, name, team ID, timezone, and shift IDs. \
             Supports pagination.",
            Effect::Read,
            list_schedules,
        ),
        ToolSpec::new(
            "get_oncall_shift",
            "Get OnCall shift",
            "Get detailed information for a specific Grafana OnCall shift using its ID. A shift \
             represents a designated time period within a schedule when users are actively \
             on-call. Returns the full shift details.",
            Effect::Read,
            get_shift,
        ),
        ToolSpec::new(
            "get_current_oncall_users",
            "Get current on-call users",
            "Get the list of users currently on-call for a specific Grafana OnCall schedule ID. \
             Returns the schedule ID, name, and a list of detailed user objects for those \
             currently on call.",
            Effect::Read,
            current_users,
        ),
        ToolSpec::new(
            "list_oncall_teams",
            "List OnCall teams",
            "List teams configured in Grafana OnCall. Returns a list of team objects with their \
             details. Supports pagination.",
            Effect::Read,
            list_teams,
        ),
        ToolSpec::new(
            "list_oncall_users",
            "List OnCall users",
            "List users from Grafana OnCall. Can retrieve all users, a specific user by ID, or \
             filter by username. Returns a list of user objects with their details. Supports \
             pagination.",
            Effect::Read,
            list_users,
        ),
    ]
}
