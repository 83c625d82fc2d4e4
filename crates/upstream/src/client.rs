//! Authenticated client factory.
//!
//! A client is built per tool call from a resolved [`ExecutionConfig`]. It carries a
//! read-only snapshot of the credentials and TLS settings; nothing is cached between calls.

use crate::config::{
    ACCESS_TOKEN_HEADER, Credentials, ExecutionConfig, GRAFANA_URL_HEADER, ID_TOKEN_HEADER,
};
use crate::context::ExecutionContext;
use crate::error::{GrafanaError, Result};
use crate::safety::{body_excerpt, redact_url};
use crate::tls::{DEFAULT_TIMEOUT, HttpTransport, wrap_transport};
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

const API_PREFIX: &str = "api";
const INCIDENT_PREFIX: &str = "api/plugins/grafana-irm-app/resources/api/v1";
const ASSERTS_PREFIX: &str = "api/plugins/grafana-asserts-app/resources/asserts/api-server";
const IRM_SETTINGS_PATH: &str = "plugins/grafana-irm-app/settings";

/// 48 MiB.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 48 * 1024 * 1024;
/// 32 MiB.
pub const PROFILING_MAX_RESPONSE_BYTES: usize = 32 * 1024 * 1024;
pub const PROFILING_TIMEOUT: Duration = Duration::from_secs(10);

/// Which Grafana sub-service a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceTarget<'a> {
    /// The platform HTTP API under `{base}/api`.
    Api,
    /// A datasource reached through the platform proxy, keyed by UID.
    Datasource(&'a str),
    /// The incident management plugin API.
    Incident,
    /// The asserts plugin API server.
    Asserts,
    /// The on-call API, discovered from plugin settings.
    OnCall,
}

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub max_response_bytes: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl ClientOptions {
    /// Profiling backends answer slowly or not at all; fail faster.
    #[must_use]
    pub fn profiling() -> Self {
        Self {
            timeout: PROFILING_TIMEOUT,
            max_response_bytes: PROFILING_MAX_RESPONSE_BYTES,
        }
    }
}

/// HTTP capability bound to one resolved root URL and one credential snapshot.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    http: reqwest::Client,
    root: Url,
    credentials: Option<Credentials>,
    extra_headers: Vec<(&'static str, String)>,
    transport: HttpTransport,
    debug: bool,
    max_response_bytes: usize,
    cancel: CancellationToken,
}

/// Build a client for `target` with default options.
///
/// # Errors
///
/// Returns a config error for an unusable base URL or TLS material, and an upstream lookup
/// error when a required pre-flight lookup (datasource, plugin settings) fails.
pub async fn build_client(
    config: &ExecutionConfig,
    target: ServiceTarget<'_>,
    cancel: &CancellationToken,
) -> Result<AuthenticatedClient> {
    build_client_with(config, target, ClientOptions::default(), cancel).await
}

/// Build a client for `target`.
///
/// # Errors
///
/// See [`build_client`].
pub async fn build_client_with(
    config: &ExecutionConfig,
    target: ServiceTarget<'_>,
    options: ClientOptions,
    cancel: &CancellationToken,
) -> Result<AuthenticatedClient> {
    let base = Url::parse(config.effective_base_url())
        .map_err(|e| GrafanaError::config(format!("invalid Grafana URL: {e}")))?;
    let transport = wrap_transport(&HttpTransport::new(options.timeout), config.tls())?;

    let api = AuthenticatedClient {
        http: transport.client_for(&base)?,
        root: join_url(&base, API_PREFIX)?,
        credentials: config.credentials(),
        extra_headers: Vec::new(),
        transport,
        debug: config.debug(),
        max_response_bytes: options.max_response_bytes,
        cancel: cancel.clone(),
    };

    match target {
        ServiceTarget::Api => Ok(api),
        ServiceTarget::Datasource(uid) => {
            if uid.is_empty() {
                return Err(GrafanaError::argument("datasource UID is required"));
            }
            api.get_json::<Value>(ApiPath::new("datasources/uid").segment(uid), &[])
                .await
                .map_err(|e| datasource_lookup_error(uid, &e))?;
            let root = join_url(&base, ApiPath::new("api/datasources/proxy/uid").segment(uid))?;
            Ok(api.rebased(root))
        }
        ServiceTarget::Incident => {
            let root = join_url(&base, INCIDENT_PREFIX)?;
            Ok(api.rebased(root))
        }
        ServiceTarget::Asserts => {
            let root = join_url(&base, ASSERTS_PREFIX)?;
            Ok(api.rebased(root))
        }
        ServiceTarget::OnCall => {
            let root = discover_oncall_url(&api).await?;
            let http = api.transport.client_for(&root)?;
            let mut client = api.rebased(root);
            client.http = http;
            client.extra_headers.push((
                GRAFANA_URL_HEADER,
                base.as_str().trim_end_matches('/').to_string(),
            ));
            Ok(client)
        }
    }
}

impl ExecutionContext {
    /// Build a client from the configuration attached to this context.
    ///
    /// # Errors
    ///
    /// See [`build_client`].
    pub async fn client(&self, target: ServiceTarget<'_>) -> Result<AuthenticatedClient> {
        build_client(&self.resolve(), target, self.cancellation()).await
    }

    /// # Errors
    ///
    /// See [`build_client`].
    pub async fn client_with(
        &self,
        target: ServiceTarget<'_>,
        options: ClientOptions,
    ) -> Result<AuthenticatedClient> {
        build_client_with(&self.resolve(), target, options, self.cancellation()).await
    }
}

fn datasource_lookup_error(uid: &str, err: &GrafanaError) -> GrafanaError {
    if err.status() == Some(404) {
        GrafanaError::lookup(format!(
            "datasource with UID '{uid}' not found. Please check if the datasource exists and is accessible"
        ))
    } else {
        GrafanaError::lookup(format!("failed to look up datasource '{uid}': {err}"))
    }
}

async fn discover_oncall_url(api: &AuthenticatedClient) -> Result<Url> {
    let settings: Value = api
        .get_json(IRM_SETTINGS_PATH, &[])
        .await
        .map_err(|e| GrafanaError::lookup(format!("failed to fetch IRM plugin settings: {e}")))?;
    let raw = settings
        .pointer("/jsonData/onCallApiUrl")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            GrafanaError::lookup("OnCall API URL is not set in IRM plugin settings")
        })?;
    Url::parse(raw).map_err(|e| {
        GrafanaError::lookup(format!("OnCall API URL from plugin settings is invalid: {e}"))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Fixed(String),
    Segment(String),
}

/// A request path relative to a client root.
///
/// Fixed parts are split on `/`. Identifiers added with [`ApiPath::segment`] always become
/// exactly one percent-encoded segment, so a `/` or `..` inside an identifier cannot reach a
/// different endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiPath {
    parts: Vec<Part>,
    trailing_slash: bool,
}

impl ApiPath {
    #[must_use]
    pub fn new(fixed: &str) -> Self {
        Self::default().then(fixed)
    }

    /// Append a fixed route fragment such as `"api/v1/label"`.
    #[must_use]
    pub fn then(mut self, fixed: &str) -> Self {
        self.trailing_slash = fixed.ends_with('/');
        self.parts.push(Part::Fixed(fixed.to_string()));
        self
    }

    /// Append one caller-supplied identifier.
    #[must_use]
    pub fn segment(mut self, id: impl fmt::Display) -> Self {
        self.trailing_slash = false;
        self.parts.push(Part::Segment(id.to_string()));
        self
    }

    /// End the path with `/`, as the on-call API expects.
    #[must_use]
    pub fn trailing_slash(mut self) -> Self {
        self.trailing_slash = true;
        self
    }
}

impl From<&str> for ApiPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<&String> for ApiPath {
    fn from(path: &String) -> Self {
        Self::new(path)
    }
}

/// Append `path` to the path of `base`, keeping any existing sub-path.
///
/// Slashes are normalized so the result never has doubled separators. A trailing slash on
/// `path` is kept.
///
/// # Errors
///
/// Returns a config error if `base` cannot carry a path (e.g. `mailto:`), and an argument
/// error for an empty, `.` or `..` identifier.
pub fn join_url(base: &Url, path: impl Into<ApiPath>) -> Result<Url> {
    let path = path.into();
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| GrafanaError::config("invalid Grafana URL: cannot carry a path"))?;
        segments.pop_if_empty();
        for part in &path.parts {
            match part {
                Part::Fixed(fixed) => {
                    segments.extend(fixed.split('/').filter(|s| !s.is_empty()));
                }
                Part::Segment(id) => {
                    if matches!(id.as_str(), "" | "." | "..") {
                        return Err(GrafanaError::argument(format!(
                            "invalid path identifier '{id}'"
                        )));
                    }
                    segments.push(id);
                }
            }
        }
        if path.trailing_slash {
            segments.push("");
        }
    }
    Ok(url)
}

impl AuthenticatedClient {
    fn rebased(mut self, root: Url) -> Self {
        self.root = root;
        self
    }

    /// Root every request path is joined onto.
    #[must_use]
    pub fn root(&self) -> &Url {
        &self.root
    }

    #[must_use]
    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// # Errors
    ///
    /// See [`join_url`].
    pub fn url(&self, path: impl Into<ApiPath>) -> Result<Url> {
        join_url(&self.root, path)
    }

    /// Start a request against `path` with auth and extra headers applied.
    ///
    /// # Errors
    ///
    /// See [`join_url`].
    pub fn request(&self, method: Method, path: impl Into<ApiPath>) -> Result<RequestBuilder> {
        let url = self.url(path)?;
        let mut request = self.http.request(method, url);
        for (name, value) in &self.extra_headers {
            request = request.header(*name, value.as_str());
        }
        Ok(self.apply_credentials(request))
    }

    // Exactly one scheme per request; the pair wins over a static key.
    fn apply_credentials(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(Credentials::OnBehalfOf(tokens)) => request
                .header(ACCESS_TOKEN_HEADER, tokens.access_token())
                .header(ID_TOKEN_HEADER, tokens.id_token()),
            Some(Credentials::StaticKey(key)) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Send a request and return the body of a 2xx response.
    ///
    /// # Errors
    ///
    /// Returns an upstream call error on cancellation, transport failure, an oversized body or
    /// a non-2xx status (with a scrubbed body excerpt).
    pub async fn send(&self, request: RequestBuilder) -> Result<Vec<u8>> {
        let request = request.build()?;
        let method = request.method().clone();
        let url = redact_url(request.url());
        let started = Instant::now();

        let response = tokio::select! {
            () = self.cancel.cancelled() => return Err(cancelled(&method, &url)),
            response = self.http.execute(request) => response?,
        };
        let status = response.status();
        let body = tokio::select! {
            () = self.cancel.cancelled() => return Err(cancelled(&method, &url)),
            body = read_response_body_limited(response, self.max_response_bytes) => body?,
        };

        if self.debug {
            info!(
                method = %method,
                url = %url,
                status = status.as_u16(),
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "grafana request"
            );
        } else {
            debug!(method = %method, url = %url, status = status.as_u16(), "grafana request");
        }

        if !status.is_success() {
            let secrets = self
                .credentials
                .as_ref()
                .map(Credentials::secrets)
                .unwrap_or_default();
            return Err(GrafanaError::UpstreamCall {
                status: Some(status.as_u16()),
                message: format!(
                    "{method} {url} returned {status}: {}",
                    body_excerpt(&body, &secrets)
                ),
            });
        }
        Ok(body)
    }

    /// # Errors
    ///
    /// See [`Self::send`]; also fails if the body is not the expected JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: impl Into<ApiPath>,
        query: &[(&str, String)],
    ) -> Result<T> {
        let request = self.request(Method::GET, path)?.query(query);
        decode_json(&self.send(request).await?)
    }

    /// # Errors
    ///
    /// See [`Self::get_json`].
    pub async fn post_json<B, T>(&self, path: impl Into<ApiPath>, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(Method::POST, path)?.json(body);
        decode_json(&self.send(request).await?)
    }

    /// # Errors
    ///
    /// See [`Self::send`]; also fails if the body is not UTF-8.
    pub async fn get_text(
        &self,
        path: impl Into<ApiPath>,
        query: &[(&str, String)],
    ) -> Result<String> {
        let request = self.request(Method::GET, path)?.query(query);
        let body = self.send(request).await?;
        String::from_utf8(body)
            .map_err(|_| GrafanaError::call("upstream returned a non UTF-8 body"))
    }
}

/// Decode a JSON response body.
///
/// # Errors
///
/// Returns an upstream call error naming the decode failure.
pub fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| GrafanaError::call(format!("failed to decode upstream response: {e}")))
}

fn cancelled(method: &Method, url: &str) -> GrafanaError {
    GrafanaError::call(format!("{method} {url} cancelled"))
}

async fn read_response_body_limited(
    mut response: reqwest::Response,
    max: usize,
) -> Result<Vec<u8>> {
    if let Some(len) = response.content_length()
        && len > max as u64
    {
        return Err(GrafanaError::call(format!(
            "response too large: {len} bytes (limit {max})"
        )));
    }

    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if out.len().saturating_add(chunk.len()) > max {
            return Err(GrafanaError::call(format!(
                "response too large: exceeded {max} bytes"
            )));
        }
        out.extend_from_slice(&chunk);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OnBehalfOf;

    fn url(raw: &str) -> Url {
        Url::parse(raw).expect("url")
    }

    #[test]
    fn join_url_produces_single_api_segment() {
        for (base, want) in [
            ("http://host", "http://host/api"),
            ("http://host/", "http://host/api"),
            ("http://host/grafana", "http://host/grafana/api"),
            ("http://host/grafana/", "http://host/grafana/api"),
            ("https://host:8443/a/b/", "https://host:8443/a/b/api"),
        ] {
            assert_eq!(join_url(&url(base), "api").expect("join").as_str(), want);
            assert_eq!(join_url(&url(base), "/api").expect("join").as_str(), want);
            assert_eq!(
                join_url(&url(base), "/api/").expect("join").as_str(),
                format!("{want}/")
            );
        }
    }

    #[test]
    fn identifiers_are_encoded_as_one_segment() {
        let base = url("http://host/api");
        let joined = join_url(&base, ApiPath::new("label").segment("a/b").then("values"))
            .expect("join");
        assert_eq!(joined.as_str(), "http://host/api/label/a%2Fb/values");

        let joined = join_url(&base, ApiPath::new("v1/users").segment(42).trailing_slash())
            .expect("join");
        assert_eq!(joined.as_str(), "http://host/api/v1/users/42/");

        for bad in ["", ".", ".."] {
            let err = join_url(&base, ApiPath::new("dashboards/uid").segment(bad)).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Argument);
        }
    }

    #[test]
    fn join_url_encodes_segments_and_drops_query() {
        let joined = join_url(&url("http://host/api?x=1#f"), "datasources/uid/a b").expect("join");
        assert_eq!(joined.as_str(), "http://host/api/datasources/uid/a%20b");
    }

    async fn api_client(config: &ExecutionConfig) -> AuthenticatedClient {
        build_client(config, ServiceTarget::Api, &CancellationToken::new())
            .await
            .expect("client")
    }

    fn header<'a>(request: &'a reqwest::Request, name: &str) -> Option<&'a str> {
        request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn token_pair_takes_precedence_over_static_key() {
        let config = ExecutionConfig::new()
            .with_base_url("http://grafana.test")
            .with_api_key("glsa_key")
            .with_on_behalf_of(OnBehalfOf::new("acc", "idt").expect("tokens"));
        let client = api_client(&config).await;
        let request = client
            .request(Method::GET, "search")
            .expect("request")
            .build()
            .expect("build");
        assert_eq!(request.url().as_str(), "http://grafana.test/api/search");
        assert_eq!(header(&request, ACCESS_TOKEN_HEADER), Some("acc"));
        assert_eq!(header(&request, ID_TOKEN_HEADER), Some("idt"));
        assert!(request.headers().get(reqwest::header::AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn static_key_uses_bearer_auth() {
        let config = ExecutionConfig::new().with_api_key("glsa_key");
        let client = api_client(&config).await;
        let request = client
            .request(Method::GET, "search")
            .expect("request")
            .build()
            .expect("build");
        assert_eq!(request.url().as_str(), "http://localhost:3000/api/search");
        assert_eq!(
            header(&request, reqwest::header::AUTHORIZATION.as_str()),
            Some("Bearer glsa_key")
        );
        assert!(request.headers().get(ACCESS_TOKEN_HEADER).is_none());
        assert!(request.headers().get(ID_TOKEN_HEADER).is_none());
    }

    #[tokio::test]
    async fn no_credentials_sends_no_auth_headers() {
        let client = api_client(&ExecutionConfig::new()).await;
        let request = client
            .request(Method::GET, "health")
            .expect("request")
            .build()
            .expect("build");
        assert!(request.headers().get(reqwest::header::AUTHORIZATION).is_none());
        assert!(request.headers().get(ACCESS_TOKEN_HEADER).is_none());
        assert!(request.headers().get(ID_TOKEN_HEADER).is_none());
    }

    #[tokio::test]
    async fn plugin_targets_join_onto_sub_paths() {
        let config = ExecutionConfig::new().with_base_url("https://example.com/grafana/");
        let token = CancellationToken::new();
        let incident = build_client(&config, ServiceTarget::Incident, &token)
            .await
            .expect("incident");
        assert_eq!(
            incident.root().as_str(),
            "https://example.com/grafana/api/plugins/grafana-irm-app/resources/api/v1"
        );
        let asserts = build_client(&config, ServiceTarget::Asserts, &token)
            .await
            .expect("asserts");
        assert_eq!(
            asserts.url("v1/assertions/llm-summary").expect("url").as_str(),
            "https://example.com/grafana/api/plugins/grafana-asserts-app/resources/asserts/api-server/v1/assertions/llm-summary"
        );
    }

    #[tokio::test]
    async fn empty_datasource_uid_is_an_argument_error() {
        let err = build_client(
            &ExecutionConfig::new(),
            ServiceTarget::Datasource(""),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Argument);
    }
}
