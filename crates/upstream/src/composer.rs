//! Context composition: one merge pipeline, parametrized by where credentials come from.

use crate::config::{DEFAULT_GRAFANA_URL, ExecutionConfig};
use crate::context::ExecutionContext;
use crate::error::{GrafanaError, Result};
use crate::safety::redact_url;
use crate::sources::{self, Environment, SourcePair};
use reqwest::header::HeaderMap;
use tracing::debug;
use url::Url;

/// How a transport acquires credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// One long-lived process session; composed once before the first message.
    Stdio,
    /// One composition when the event stream opens.
    Sse,
    /// One composition per inbound request.
    StreamableHttp,
}

impl TransportMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        }
    }
}

/// Where the per-request (base URL, API key) pair is read from.
#[derive(Debug, Clone, Copy)]
pub enum CredentialSource<'a> {
    /// Environment only.
    Environment,
    /// Request headers first, then environment.
    Request(&'a HeaderMap),
}

/// Builds execution contexts from a base config and the credential sources.
///
/// The base config carries what the command line decided (debug, TLS); base URL and key
/// are merged per field as header, then environment, then base, then the platform default.
#[derive(Debug, Clone)]
pub struct Composer {
    base: ExecutionConfig,
    env: Environment,
}

impl Composer {
    #[must_use]
    pub fn new(base: ExecutionConfig, env: Environment) -> Self {
        Self { base, env }
    }

    #[must_use]
    pub fn base(&self) -> &ExecutionConfig {
        &self.base
    }

    /// Merge the sources into a final configuration.
    ///
    /// # Errors
    ///
    /// Returns a config error if the chosen base URL does not parse as an http(s) URL. There is
    /// no fallback to the default once a value was supplied.
    pub fn compose(&self, source: CredentialSource<'_>) -> Result<ExecutionConfig> {
        let from_headers = match source {
            CredentialSource::Request(headers) => sources::from_headers(headers),
            CredentialSource::Environment => SourcePair::default(),
        };
        let from_env = sources::from_environment(&self.env);

        let base_url = first_non_empty(&[
            &from_headers.base_url,
            &from_env.base_url,
            self.base.base_url(),
        ])
        .unwrap_or(DEFAULT_GRAFANA_URL)
        .to_string();
        let api_key = first_non_empty(&[
            &from_headers.api_key,
            &from_env.api_key,
            self.base.api_key(),
        ])
        .unwrap_or_default()
        .to_string();

        let parsed = validate_base_url(&base_url)?;
        debug!(
            url = %redact_url(&parsed),
            api_key_set = !api_key.is_empty(),
            "composed grafana config"
        );

        Ok(self
            .base
            .clone()
            .with_base_url(base_url)
            .with_api_key(api_key))
    }

    /// Compose for a transport and attach the result to a context derived from `parent`.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::compose`] failures.
    pub fn context_for(
        &self,
        mode: TransportMode,
        parent: &ExecutionContext,
        headers: Option<&HeaderMap>,
    ) -> Result<ExecutionContext> {
        let source = match (mode, headers) {
            (TransportMode::Stdio, _) | (_, None) => CredentialSource::Environment,
            (TransportMode::Sse | TransportMode::StreamableHttp, Some(h)) => {
                CredentialSource::Request(h)
            }
        };
        let config = self.compose(source)?;
        Ok(parent.attach(config))
    }

    /// Session transport: environment overlays the base config once.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::compose`] failures.
    pub fn for_session(&self, parent: &ExecutionContext) -> Result<ExecutionContext> {
        self.context_for(TransportMode::Stdio, parent, None)
    }

    /// Stateless request transport: header > environment > default, per request.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::compose`] failures.
    pub fn for_request(
        &self,
        parent: &ExecutionContext,
        headers: &HeaderMap,
    ) -> Result<ExecutionContext> {
        self.context_for(TransportMode::StreamableHttp, parent, Some(headers))
    }

    /// Event-stream transport: same precedence as requests, applied at stream open.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::compose`] failures.
    pub fn for_stream(
        &self,
        parent: &ExecutionContext,
        headers: &HeaderMap,
    ) -> Result<ExecutionContext> {
        self.context_for(TransportMode::Sse, parent, Some(headers))
    }
}

fn first_non_empty<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().copied().find(|v| !v.is_empty())
}

fn validate_base_url(raw: &str) -> Result<Url> {
    let url =
        Url::parse(raw).map_err(|e| GrafanaError::config(format!("invalid Grafana URL: {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(GrafanaError::config(format!(
            "invalid Grafana URL: unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(GrafanaError::config("invalid Grafana URL: missing host"));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        GRAFANA_API_KEY_ENV, GRAFANA_API_KEY_HEADER, GRAFANA_URL_ENV, GRAFANA_URL_HEADER,
        TlsConfig,
    };
    use crate::error::ErrorKind;
    use reqwest::header::{HeaderName, HeaderValue};

    const HEADER_URL: &str = "http://header.example.com";
    const HEADER_KEY: &str = "glsa_header";
    const ENV_URL: &str = "http://env.example.com";
    const ENV_KEY: &str = "glsa_env";

    fn headers(url: Option<&str>, key: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(url) = url {
            map.insert(
                HeaderName::from_static("x-grafana-url"),
                HeaderValue::from_str(url).expect("url header"),
            );
        }
        if let Some(key) = key {
            map.insert(
                HeaderName::from_static("x-grafana-api-key"),
                HeaderValue::from_str(key).expect("key header"),
            );
        }
        map
    }

    fn env(url: Option<&str>, key: Option<&str>) -> Environment {
        let mut pairs = Vec::new();
        if let Some(url) = url {
            pairs.push((GRAFANA_URL_ENV, url.to_string()));
        }
        if let Some(key) = key {
            pairs.push((GRAFANA_API_KEY_ENV, key.to_string()));
        }
        Environment::from_pairs(pairs)
    }

    #[test]
    fn header_names_match_lowercase_fixtures() {
        assert!(GRAFANA_URL_HEADER.eq_ignore_ascii_case("x-grafana-url"));
        assert!(GRAFANA_API_KEY_HEADER.eq_ignore_ascii_case("x-grafana-api-key"));
    }

    #[test]
    fn precedence_is_applied_per_field() {
        let options = [None, Some(())];
        for header_url in options {
            for header_key in options {
                for env_url in options {
                    for env_key in options {
                        let composer = Composer::new(
                            ExecutionConfig::new(),
                            env(env_url.map(|()| ENV_URL), env_key.map(|()| ENV_KEY)),
                        );
                        let h = headers(
                            header_url.map(|()| HEADER_URL),
                            header_key.map(|()| HEADER_KEY),
                        );
                        let config = composer
                            .compose(CredentialSource::Request(&h))
                            .expect("compose");

                        let want_url = if header_url.is_some() {
                            HEADER_URL
                        } else if env_url.is_some() {
                            ENV_URL
                        } else {
                            DEFAULT_GRAFANA_URL
                        };
                        let want_key = if header_key.is_some() {
                            HEADER_KEY
                        } else if env_key.is_some() {
                            ENV_KEY
                        } else {
                            ""
                        };
                        assert_eq!(config.base_url(), want_url);
                        assert_eq!(config.api_key(), want_key);
                    }
                }
            }
        }
    }

    #[test]
    fn header_url_with_env_key_mixes_sources() {
        let composer = Composer::new(ExecutionConfig::new(), env(None, Some(ENV_KEY)));
        let h = headers(Some(HEADER_URL), None);
        let config = composer
            .compose(CredentialSource::Request(&h))
            .expect("compose");
        assert_eq!(config.base_url(), HEADER_URL);
        assert_eq!(config.api_key(), ENV_KEY);
    }

    #[test]
    fn session_mode_ignores_headers_and_keeps_base_flags() {
        let base = ExecutionConfig::new()
            .with_debug(true)
            .with_tls(TlsConfig::from_flags(None, None, None, true));
        let composer = Composer::new(base, env(Some("http://env.example.com/"), Some(ENV_KEY)));
        let ctx = composer
            .for_session(&ExecutionContext::new())
            .expect("compose");
        let config = ctx.resolve();
        assert_eq!(config.base_url(), "http://env.example.com");
        assert_eq!(config.api_key(), ENV_KEY);
        assert!(config.debug());
        assert!(config.tls().is_some_and(|t| t.skip_verify));
    }

    #[test]
    fn malformed_url_is_a_config_error_without_fallback() {
        let composer = Composer::new(ExecutionConfig::new(), env(None, None));
        for bad in ["not a url", "localhost:3000", "http://"] {
            let h = headers(Some(bad), None);
            let err = composer
                .compose(CredentialSource::Request(&h))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "{bad}");
            assert!(err.to_string().starts_with("invalid Grafana URL"));
        }
    }

    #[test]
    fn malformed_env_url_fails_session_composition() {
        let composer = Composer::new(ExecutionConfig::new(), env(Some("::nope::"), None));
        let err = composer.for_session(&ExecutionContext::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
