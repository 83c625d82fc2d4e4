//! Resolved per-request configuration.

use crate::error::{GrafanaError, Result};
use std::fmt;
use std::path::PathBuf;

pub const GRAFANA_URL_ENV: &str = "GRAFANA_URL";
pub const GRAFANA_API_KEY_ENV: &str = "GRAFANA_API_KEY";

pub const GRAFANA_URL_HEADER: &str = "X-Grafana-URL";
pub const GRAFANA_API_KEY_HEADER: &str = "X-Grafana-API-Key";

/// On-behalf-of headers, used both inbound (from the hosting runtime) and outbound (to Grafana).
pub const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";
pub const ID_TOKEN_HEADER: &str = "X-Grafana-Id";

pub const DEFAULT_GRAFANA_URL: &str = "http://localhost:3000";

/// Delegated-identity token pair. Both halves are always non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct OnBehalfOf {
    access_token: String,
    id_token: String,
}

impl OnBehalfOf {
    /// # Errors
    ///
    /// Returns a config error if either token is empty.
    pub fn new(access_token: impl Into<String>, id_token: impl Into<String>) -> Result<Self> {
        let access_token = access_token.into();
        let id_token = id_token.into();
        if access_token.is_empty() || id_token.is_empty() {
            return Err(GrafanaError::config("neither token may be empty"));
        }
        Ok(Self {
            access_token,
            id_token,
        })
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn id_token(&self) -> &str {
        &self.id_token
    }
}

impl fmt::Debug for OnBehalfOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnBehalfOf")
            .field("access_token", &"<redacted>")
            .field("id_token", &"<redacted>")
            .finish()
    }
}

/// The single credential scheme a request is signed with.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    StaticKey(String),
    OnBehalfOf(OnBehalfOf),
}

impl Credentials {
    /// Raw secret values, for scrubbing error excerpts.
    #[must_use]
    pub fn secrets(&self) -> Vec<&str> {
        match self {
            Self::StaticKey(key) => vec![key.as_str()],
            Self::OnBehalfOf(t) => vec![t.access_token(), t.id_token()],
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaticKey(_) => f.write_str("StaticKey(<redacted>)"),
            Self::OnBehalfOf(t) => f.debug_tuple("OnBehalfOf").field(t).finish(),
        }
    }
}

/// Declarative TLS overrides, as supplied on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub skip_verify: bool,
}

impl TlsConfig {
    /// Build an override only if at least one setting was given.
    #[must_use]
    pub fn from_flags(
        cert_file: Option<PathBuf>,
        key_file: Option<PathBuf>,
        ca_file: Option<PathBuf>,
        skip_verify: bool,
    ) -> Option<Self> {
        if cert_file.is_none() && key_file.is_none() && ca_file.is_none() && !skip_verify {
            return None;
        }
        Some(Self {
            cert_file,
            key_file,
            ca_file,
            skip_verify,
        })
    }
}

/// Resolved configuration for one request or session.
///
/// Values are immutable once attached to an [`ExecutionContext`](crate::ExecutionContext);
/// the `with_*` builders return a new value. `Default` is the zero value returned when no
/// configuration was attached: empty base URL, no credentials, no TLS override.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ExecutionConfig {
    base_url: String,
    api_key: String,
    on_behalf_of: Option<OnBehalfOf>,
    debug: bool,
    tls: Option<TlsConfig>,
}

impl ExecutionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    #[must_use]
    pub fn with_on_behalf_of(mut self, tokens: OnBehalfOf) -> Self {
        self.on_behalf_of = Some(tokens);
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: Option<TlsConfig>) -> Self {
        self.tls = tls;
        self
    }

    /// The configured base URL, possibly empty (see [`Self::effective_base_url`]).
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The base URL with the platform default substituted for an empty value.
    ///
    /// This is the only place the default is applied on the read side.
    #[must_use]
    pub fn effective_base_url(&self) -> &str {
        if self.base_url.is_empty() {
            DEFAULT_GRAFANA_URL
        } else {
            &self.base_url
        }
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn on_behalf_of(&self) -> Option<&OnBehalfOf> {
        self.on_behalf_of.as_ref()
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    #[must_use]
    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    /// The credential scheme outgoing requests use: the token pair wins over a static key.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        if let Some(tokens) = &self.on_behalf_of {
            return Some(Credentials::OnBehalfOf(tokens.clone()));
        }
        if self.api_key.is_empty() {
            None
        } else {
            Some(Credentials::StaticKey(self.api_key.clone()))
        }
    }
}

impl fmt::Debug for ExecutionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionConfig")
            .field("base_url", &crate::safety::redact_url_str(self.effective_base_url()))
            .field("api_key_set", &!self.api_key.is_empty())
            .field("on_behalf_of", &self.on_behalf_of.is_some())
            .field("debug", &self.debug)
            .field("tls", &self.tls)
            .finish()
    }
}
