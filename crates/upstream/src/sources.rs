//! Credential source readers.
//!
//! Each reader is independent: none of them caches, and none reads another's storage.

use crate::config::{
    ACCESS_TOKEN_HEADER, GRAFANA_API_KEY_ENV, GRAFANA_API_KEY_HEADER, GRAFANA_URL_ENV,
    GRAFANA_URL_HEADER, ID_TOKEN_HEADER, OnBehalfOf,
};
use crate::error::{GrafanaError, Result};
use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Lookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Read-only view of an environment.
///
/// Production uses [`Environment::process`], which consults the process environment on every
/// lookup. Tests inject fixed maps instead of mutating process state.
#[derive(Clone)]
pub struct Environment {
    lookup: Arc<Lookup>,
}

impl Environment {
    #[must_use]
    pub fn process() -> Self {
        Self::from_fn(|key| std::env::var(key).ok())
    }

    pub fn from_fn(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Arc::new(lookup),
        }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_fn(move |key| map.get(key).cloned())
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::from_fn(|_| None)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Environment")
    }
}

/// A (base URL, API key) pair from one source. Empty strings mean "not supplied".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SourcePair {
    pub base_url: String,
    pub api_key: String,
}

impl fmt::Debug for SourcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourcePair")
            .field("base_url_set", &!self.base_url.is_empty())
            .field("api_key_set", &!self.api_key.is_empty())
            .finish()
    }
}

/// Read `GRAFANA_URL` / `GRAFANA_API_KEY`.
#[must_use]
pub fn from_environment(env: &Environment) -> SourcePair {
    SourcePair {
        base_url: trim_url(env.get(GRAFANA_URL_ENV).unwrap_or_default()),
        api_key: env.get(GRAFANA_API_KEY_ENV).unwrap_or_default(),
    }
}

/// Read `X-Grafana-URL` / `X-Grafana-API-Key` from an inbound request.
#[must_use]
pub fn from_headers(headers: &HeaderMap) -> SourcePair {
    SourcePair {
        base_url: trim_url(header_value(headers, GRAFANA_URL_HEADER)),
        api_key: header_value(headers, GRAFANA_API_KEY_HEADER),
    }
}

/// Extract the on-behalf-of pair a hosting runtime put on an inbound request.
///
/// Neither header present yields `None`.
///
/// # Errors
///
/// Returns a config error if only one of the two headers is present or either is empty.
pub fn on_behalf_of_from_headers(headers: &HeaderMap) -> Result<Option<OnBehalfOf>> {
    let has_access = headers.contains_key(ACCESS_TOKEN_HEADER);
    let has_id = headers.contains_key(ID_TOKEN_HEADER);
    if !has_access && !has_id {
        return Ok(None);
    }
    OnBehalfOf::new(
        header_value(headers, ACCESS_TOKEN_HEADER),
        header_value(headers, ID_TOKEN_HEADER),
    )
    .map(Some)
    .map_err(|e| match e {
        GrafanaError::Config(m) => GrafanaError::config(format!(
            "{ACCESS_TOKEN_HEADER} and {ID_TOKEN_HEADER} must be sent together: {m}"
        )),
        other => other,
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

fn trim_url(raw: String) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
