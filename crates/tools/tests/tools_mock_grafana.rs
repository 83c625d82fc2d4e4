use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use mcp_grafana_test_support::MockUpstream;
use mcp_grafana_tools::{ToolRegistry, ToolSelection};
use mcp_grafana_upstream::{ExecutionConfig, ExecutionContext, OnBehalfOf};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    query: String,
    headers: HeaderMap,
}

#[derive(Clone, Default)]
struct Seen {
    requests: Arc<Mutex<Vec<Recorded>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl Seen {
    fn find(&self, path: &str) -> Recorded {
        self.requests
            .lock()
            .iter()
            .find(|r| r.path == path)
            .cloned()
            .unwrap_or_else(|| panic!("no request to {path}"))
    }

    fn paths(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.path.clone()).collect()
    }
}

async fn record(State(seen): State<Seen>, req: Request, next: Next) -> Response {
    seen.requests.lock().push(Recorded {
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
        query: req.uri().query().unwrap_or_default().to_string(),
        headers: req.headers().clone(),
    });
    next.run(req).await
}

async fn datasource(Path(uid): Path<String>) -> Result<Json<Value>, StatusCode> {
    match uid.as_str() {
        "prom" | "loki" | "pyro" => Ok(Json(json!({"uid": uid}))),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn irm_settings(headers: HeaderMap) -> Json<Value> {
    let host = headers
        .get("host")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({"jsonData": {"onCallApiUrl": format!("http://{host}/oncall/")}}))
}

async fn oncall_user(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    if id == "U1" {
        Ok(Json(json!({"id": "U1", "username": "alice"})))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn incidents(State(seen): State<Seen>, Json(body): Json<Value>) -> Json<Value> {
    seen.bodies.lock().push(body);
    Json(json!({"incidentPreviews": [{"incidentID": "1", "title": "DB down"}]}))
}

fn grafana(seen: Seen) -> Router {
    Router::new()
        .route(
            "/api/search",
            get(|| async { Json(json!([{"uid": "d1", "title": "CPU"}])) }),
        )
        .route("/api/datasources/uid/{uid}", get(datasource))
        .route(
            "/api/datasources/name/{name}",
            get(|Path(name): Path<String>| async move { Json(json!({"name": name})) }),
        )
        .route(
            "/api/datasources/proxy/uid/prom/api/v1/query_range",
            get(|| async {
                Json(json!({
                    "status": "success",
                    "data": {
                        "resultType": "matrix",
                        "result": [{"metric": {"__name__": "up"}, "values": [[1700000000, "1"]]}]
                    }
                }))
            }),
        )
        .route(
            "/api/datasources/proxy/uid/loki/loki/api/v1/query_range",
            get(|| async {
                Json(json!({
                    "status": "success",
                    "data": {
                        "resultType": "streams",
                        "result": [{"stream": {"app": "api"}, "values": [["1700000000000000000", "GET /"]]}]
                    }
                }))
            }),
        )
        .route(
            "/api/datasources/proxy/uid/loki/loki/api/v1/labels",
            get(|| async { Json(json!({"status": "success"})) }),
        )
        .route(
            "/api/prometheus/grafana/api/v1/rules",
            get(|| async {
                Json(json!({"data": {"groups": [
                    {"name": "g1", "rules": [
                        {"uid": "r1", "name": "High CPU", "state": "firing", "labels": {"severity": "critical"}},
                        {"uid": "r2", "name": "Disk", "state": "inactive", "labels": {"severity": "info"}}
                    ]},
                    {"name": "g2", "rules": [
                        {"uid": "r3", "name": "Memory", "state": "pending", "labels": {"severity": "critical"}}
                    ]}
                ]}}))
            }),
        )
        .route("/api/plugins/grafana-irm-app/settings", get(irm_settings))
        .route(
            "/oncall/api/v1/schedules/{id}/",
            get(|Path(id): Path<String>| async move {
                Json(json!({"id": id, "name": "Primary", "on_call_now": ["U1", "U2"]}))
            }),
        )
        .route("/oncall/api/v1/users/{id}/", get(oncall_user))
        .route(
            "/api/plugins/grafana-irm-app/resources/api/v1/IncidentsService.QueryIncidentPreviews",
            post(incidents),
        )
        .route(
            "/api/plugins/grafana-asserts-app/resources/asserts/api-server/v1/assertions/llm-summary",
            post(|| async { "checkout is saturated" }),
        )
        .route(
            "/api/datasources/proxy/uid/pyro/querier.v1.QuerierService/ProfileTypes",
            post(|| async {
                Json(json!({"profileTypes": [{
                    "ID": "process_cpu:cpu:nanoseconds:cpu:nanoseconds",
                    "name": "process_cpu", "sampleType": "cpu", "sampleUnit": "nanoseconds",
                    "periodType": "cpu", "periodUnit": "nanoseconds"
                }]}))
            }),
        )
        .route(
            "/api/datasources/proxy/uid/pyro/pyroscope/render",
            get(|| async { "digraph \"unnamed\" {\nShowing nodes accounting for 0, 0% of 0 total\n}\n" }),
        )
        .layer(middleware::from_fn_with_state(seen.clone(), record))
        .with_state(seen)
}

struct Harness {
    mock: MockUpstream,
    seen: Seen,
    registry: ToolRegistry,
}

impl Harness {
    async fn start() -> Self {
        let seen = Seen::default();
        let mock = MockUpstream::start(grafana(seen.clone()))
            .await
            .expect("mock grafana");
        Self {
            mock,
            seen,
            registry: ToolRegistry::new(&ToolSelection::all()),
        }
    }

    fn config(&self) -> ExecutionConfig {
        ExecutionConfig::new()
            .with_base_url(self.mock.base_url())
            .with_api_key("secret")
    }

    fn ctx(&self) -> ExecutionContext {
        ExecutionContext::new().attach(self.config())
    }

    async fn call_in(&self, ctx: &ExecutionContext, name: &str, args: Value) -> (bool, Value) {
        let result = self
            .registry
            .call_tool(ctx, name, args)
            .await
            .expect("registered tool");
        let content = serde_json::to_value(&result.content[0]).expect("content");
        let text = content["text"].as_str().unwrap_or_default().to_string();
        let payload = serde_json::from_str(&text).unwrap_or(Value::String(text));
        let failed = result.is_error == Some(true);
        if failed {
            let kind = result
                .structured_content
                .as_ref()
                .and_then(|v| v.pointer("/error/kind"))
                .cloned()
                .unwrap_or(Value::Null);
            return (true, json!({"kind": kind, "message": payload}));
        }
        (false, payload)
    }

    async fn call(&self, name: &str, args: Value) -> (bool, Value) {
        self.call_in(&self.ctx(), name, args).await
    }
}

#[tokio::test]
async fn search_sends_dashboard_filter_with_bearer_key() {
    let h = Harness::start().await;
    let (failed, out) = h
        .call("grafana_search_dashboards", json!({"query": "cpu"}))
        .await;
    assert!(!failed, "{out}");
    assert_eq!(out, json!([{"uid": "d1", "title": "CPU"}]));

    let req = h.seen.find("/api/search");
    assert_eq!(req.query, "query=cpu&type=dash-db");
    assert_eq!(
        req.headers.get("authorization").and_then(|v| v.to_str().ok()),
        Some("Bearer secret")
    );
}

#[tokio::test]
async fn on_behalf_of_tokens_replace_the_static_key() {
    let h = Harness::start().await;
    let tokens = OnBehalfOf::new("access", "id").expect("tokens");
    let ctx = ExecutionContext::new().attach(h.config().with_on_behalf_of(tokens));
    let (failed, _) = h
        .call_in(&ctx, "grafana_search_dashboards", json!({}))
        .await;
    assert!(!failed);

    let req = h.seen.find("/api/search");
    assert_eq!(req.query, "");
    assert!(req.headers.get("authorization").is_none());
    assert_eq!(
        req.headers.get("x-access-token").and_then(|v| v.to_str().ok()),
        Some("access")
    );
    assert_eq!(
        req.headers.get("x-grafana-id").and_then(|v| v.to_str().ok()),
        Some("id")
    );
}

#[tokio::test]
async fn prometheus_range_query_goes_through_datasource_proxy() {
    let h = Harness::start().await;
    let (failed, out) = h
        .call(
            "query_prometheus",
            json!({
                "datasourceUid": "prom",
                "expr": "up",
                "startTime": "2025-03-01T11:00:00Z",
                "endTime": "2025-03-01T12:00:00Z",
                "stepSeconds": 60,
                "queryType": "range"
            }),
        )
        .await;
    assert!(!failed, "{out}");
    assert_eq!(out[0]["metric"]["__name__"], json!("up"));

    assert_eq!(
        h.seen.paths(),
        [
            "/api/datasources/uid/prom",
            "/api/datasources/proxy/uid/prom/api/v1/query_range"
        ]
    );
    let req = h.seen.find("/api/datasources/proxy/uid/prom/api/v1/query_range");
    assert_eq!(req.method, "GET");
    assert_eq!(
        req.query,
        "query=up&start=1740826800&end=1740830400&step=60"
    );
}

#[tokio::test]
async fn unknown_datasource_is_a_lookup_error() {
    let h = Harness::start().await;
    let (failed, out) = h
        .call(
            "query_prometheus",
            json!({"datasourceUid": "nope", "expr": "up", "startTime": "now", "queryType": "instant"}),
        )
        .await;
    assert!(failed);
    assert_eq!(out["kind"], json!("upstream_lookup_error"));
    assert!(
        out["message"]
            .as_str()
            .unwrap_or_default()
            .contains("datasource with UID 'nope' not found")
    );
}

#[tokio::test]
async fn argument_errors_happen_before_any_upstream_call() {
    let h = Harness::start().await;
    let (failed, out) = h.call("list_alert_rules", json!({"limit": -1})).await;
    assert!(failed);
    assert_eq!(out["kind"], json!("argument_error"));
    assert!(h.seen.paths().is_empty());

    let (failed, out) = h
        .call("get_datasource_by_uid", json!({"uid": ""}))
        .await;
    assert!(failed);
    assert_eq!(out["kind"], json!("argument_error"));
    assert!(h.seen.paths().is_empty());

    let (failed, out) = h
        .call(
            "grafana_query_loki_logs",
            json!({"datasourceUid": "loki", "logql": "{app=\"api\"}", "limit": -5}),
        )
        .await;
    assert!(failed);
    assert_eq!(out["kind"], json!("argument_error"));
    assert!(h.seen.paths().is_empty());
}

#[tokio::test]
async fn datasource_names_cannot_escape_their_path_segment() {
    let h = Harness::start().await;
    let (failed, out) = h
        .call(
            "get_datasource_by_name",
            json!({"name": "team/../../admin/prom"}),
        )
        .await;
    assert!(!failed, "{out}");
    assert_eq!(out, json!({"name": "team/../../admin/prom"}));
    assert_eq!(
        h.seen.paths(),
        vec!["/api/datasources/name/team%2F..%2F..%2Fadmin%2Fprom".to_string()]
    );
}

#[tokio::test]
async fn loki_logs_are_flattened_with_defaults() {
    let h = Harness::start().await;
    let (failed, out) = h
        .call(
            "grafana_query_loki_logs",
            json!({"datasourceUid": "loki", "logql": "{app=\"api\"}"}),
        )
        .await;
    assert!(!failed, "{out}");
    assert_eq!(
        out,
        json!([{"timestamp": "1700000000000000000", "line": "GET /", "labels": {"app": "api"}}])
    );
    let req = h.seen.find("/api/datasources/proxy/uid/loki/loki/api/v1/query_range");
    assert!(req.query.contains("limit=10"), "{}", req.query);
    assert!(req.query.contains("direction=backward"), "{}", req.query);
}

#[tokio::test]
async fn loki_labels_without_data_are_empty() {
    let h = Harness::start().await;
    let (failed, out) = h
        .call("grafana_list_loki_label_names", json!({"datasourceUid": "loki"}))
        .await;
    assert!(!failed, "{out}");
    assert_eq!(out, json!([]));
}

#[tokio::test]
async fn alert_rules_are_filtered_and_paged() {
    let h = Harness::start().await;
    let (failed, out) = h
        .call(
            "list_alert_rules",
            json!({
                "limit": 1,
                "page": 2,
                "label_selectors": [{"filters": [{"name": "severity", "value": "critical"}]}]
            }),
        )
        .await;
    assert!(!failed, "{out}");
    assert_eq!(
        out,
        json!([{"uid": "r3", "title": "Memory", "state": "pending", "labels": {"severity": "critical"}}])
    );

    let (_, out) = h.call("list_alert_rules", json!({"page": 5})).await;
    assert_eq!(out, json!([]));
}

#[tokio::test]
async fn current_oncall_users_skip_failed_lookups() {
    let h = Harness::start().await;
    let (failed, out) = h
        .call("get_current_oncall_users", json!({"scheduleId": "S1"}))
        .await;
    assert!(!failed, "{out}");
    assert_eq!(out["scheduleName"], json!("Primary"));
    assert_eq!(out["users"], json!([{"id": "U1", "username": "alice"}]));

    let req = h.seen.find("/oncall/api/v1/schedules/S1/");
    assert_eq!(
        req.headers.get("x-grafana-url").and_then(|v| v.to_str().ok()),
        Some(h.mock.base_url().trim_end_matches('/'))
    );
}

#[tokio::test]
async fn incident_query_excludes_drills() {
    let h = Harness::start().await;
    let (failed, out) = h
        .call("list_incidents", json!({"status": "active"}))
        .await;
    assert!(!failed, "{out}");
    assert_eq!(out["incidentPreviews"][0]["incidentID"], json!("1"));
    let body = h.seen.bodies.lock()[0].clone();
    assert_eq!(
        body,
        json!({"query": {"limit": 10, "orderDirection": "DESC", "queryString": "isdrill:false and status:active"}})
    );
}

#[tokio::test]
async fn assertions_summary_is_returned_verbatim() {
    let h = Harness::start().await;
    let (failed, out) = h
        .call(
            "get_assertions",
            json!({
                "startTime": "2025-03-01T11:00:00Z",
                "endTime": "2025-03-01T12:00:00Z",
                "entityType": "Service",
                "entityName": "checkout"
            }),
        )
        .await;
    assert!(!failed, "{out}");
    assert_eq!(out, json!("checkout is saturated"));
}

#[tokio::test]
async fn pyroscope_profile_types_and_empty_profiles() {
    let h = Harness::start().await;
    let (failed, out) = h
        .call(
            "grafana_list_pyroscope_profile_types",
            json!({"data_source_uid": "pyro"}),
        )
        .await;
    assert!(!failed, "{out}");
    assert_eq!(out, json!(["process_cpu:cpu:nanoseconds:cpu:nanoseconds"]));
    let req = h
        .seen
        .find("/api/datasources/proxy/uid/pyro/querier.v1.QuerierService/ProfileTypes");
    assert_eq!(
        req.headers
            .get("connect-protocol-version")
            .and_then(|v| v.to_str().ok()),
        Some("1")
    );

    let (failed, out) = h
        .call(
            "fetch_pyroscope_profile",
            json!({"data_source_uid": "pyro", "profile_type": "process_cpu:cpu:nanoseconds:cpu:nanoseconds"}),
        )
        .await;
    assert!(failed);
    assert_eq!(out["kind"], json!("upstream_call_error"));
    let req = h.seen.find("/api/datasources/proxy/uid/pyro/pyroscope/render");
    assert!(req.query.contains("format=dot"), "{}", req.query);
    assert!(req.query.contains("max-nodes=100"), "{}", req.query);
}
