//! The `{status, data}` envelope shared by Prometheus and Loki HTTP APIs.

use mcp_grafana_upstream::{GrafanaError, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn unexpected(service: &str) -> GrafanaError {
    GrafanaError::call(format!("{service} API returned unexpected response format"))
}

fn checked_data(service: &str, body: Value) -> Result<Option<Value>> {
    let envelope: Envelope = serde_json::from_value(body).map_err(|_| unexpected(service))?;
    if envelope.status != "success" {
        let detail = match (envelope.error_type, envelope.error) {
            (Some(kind), Some(error)) => format!(": {kind}: {error}"),
            (None, Some(error)) | (Some(error), None) => format!(": {error}"),
            (None, None) => String::new(),
        };
        return Err(GrafanaError::call(format!(
            "{service} API returned status '{}'{detail}",
            envelope.status
        )));
    }
    Ok(envelope.data.filter(|d| !d.is_null()))
}

/// Unwrap `data` from a `status: success` response body.
pub(crate) fn success_data<T: DeserializeOwned>(service: &str, body: Value) -> Result<T> {
    let data = checked_data(service, body)?
        .ok_or_else(|| GrafanaError::call(format!("empty response from {service} API")))?;
    serde_json::from_value(data).map_err(|_| unexpected(service))
}

/// Like [`success_data`], but a missing `data` field yields the default.
pub(crate) fn success_data_or_default<T>(service: &str, body: Value) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match checked_data(service, body)? {
        Some(data) => serde_json::from_value(data).map_err(|_| unexpected(service)),
        None => Ok(T::default()),
    }
}
