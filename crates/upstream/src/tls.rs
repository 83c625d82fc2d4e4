//! TLS material resolution and the HTTP transport it decorates.
//!
//! Trust material is parsed from disk every time a transport is wrapped, so rotated
//! certificates are picked up by the next request without a restart.

use crate::config::TlsConfig;
use crate::error::{GrafanaError, Result};
use reqwest::{Certificate, Identity};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Timeout for platform, plugin and datasource calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Parsed TLS trust settings, ready to apply to an HTTP client.
#[derive(Clone)]
pub struct TrustConfig {
    identity: Option<Identity>,
    root_certificates: Vec<Certificate>,
    insecure_skip_verify: bool,
}

impl TrustConfig {
    #[must_use]
    pub fn has_client_identity(&self) -> bool {
        self.identity.is_some()
    }

    #[must_use]
    pub fn root_certificate_count(&self) -> usize {
        self.root_certificates.len()
    }

    /// A CA bundle is the whole trust store, not an addition to the platform roots.
    #[must_use]
    pub fn replaces_built_in_roots(&self) -> bool {
        !self.root_certificates.is_empty()
    }

    #[must_use]
    pub fn insecure_skip_verify(&self) -> bool {
        self.insecure_skip_verify
    }
}

impl fmt::Debug for TrustConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustConfig")
            .field("client_identity", &self.identity.is_some())
            .field("root_certificates", &self.root_certificates.len())
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

/// Materialize a TLS override.
///
/// `None` in gives `None` out, so callers can tell "no override" apart from "override with
/// no restrictions".
///
/// # Errors
///
/// Returns a config error if only one of cert/key is set, if the client certificate cannot be
/// loaded, or if the CA file is unreadable or contains no valid PEM certificate.
pub fn resolve(tls: Option<&TlsConfig>) -> Result<Option<TrustConfig>> {
    let Some(tls) = tls else {
        return Ok(None);
    };

    let identity = match (&tls.cert_file, &tls.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let mut pem = std::fs::read(cert_file).map_err(|e| {
                GrafanaError::config(format!("failed to load client certificate: {e}"))
            })?;
            let key = std::fs::read(key_file).map_err(|e| {
                GrafanaError::config(format!("failed to load client certificate: {e}"))
            })?;
            pem.push(b'\n');
            pem.extend_from_slice(&key);
            let identity = Identity::from_pem(&pem).map_err(|e| {
                GrafanaError::config(format!("failed to load client certificate: {e}"))
            })?;
            Some(identity)
        }
        (None, None) => None,
        _ => {
            return Err(GrafanaError::config(
                "both TLS cert file and key file must be provided",
            ));
        }
    };

    let root_certificates = match &tls.ca_file {
        Some(ca_file) => {
            let pem = std::fs::read(ca_file).map_err(|e| {
                GrafanaError::config(format!("failed to read CA certificate: {e}"))
            })?;
            let certs = Certificate::from_pem_bundle(&pem).map_err(|e| {
                GrafanaError::config(format!("failed to parse CA certificate: {e}"))
            })?;
            if certs.is_empty() {
                return Err(GrafanaError::config(
                    "failed to parse CA certificate: no PEM certificates found",
                ));
            }
            certs
        }
        None => Vec::new(),
    };

    Ok(Some(TrustConfig {
        identity,
        root_certificates,
        insecure_skip_verify: tls.skip_verify,
    }))
}

/// Connection-level settings for outgoing Grafana requests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
    connect_timeout: Duration,
    user_agent: String,
    trust: Option<TrustConfig>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl HttpTransport {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            connect_timeout: CONNECT_TIMEOUT.min(timeout),
            user_agent: format!("mcp-grafana/{}", env!("CARGO_PKG_VERSION")),
            trust: None,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn trust(&self) -> Option<&TrustConfig> {
        self.trust.as_ref()
    }

    /// Build a client pinned to the scheme of `target`.
    ///
    /// An `https` target gets `https_only`; an `http` target is never upgraded. Redirects are
    /// never followed, so credential headers cannot leak to another origin. A CA file replaces
    /// the built-in roots instead of extending them.
    ///
    /// # Errors
    ///
    /// Returns a config error if the TLS backend rejects the trust material.
    pub fn client_for(&self, target: &Url) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .https_only(target.scheme() == "https");

        if let Some(trust) = &self.trust {
            if trust.insecure_skip_verify {
                builder = builder.danger_accept_invalid_certs(true);
            }
            if let Some(identity) = &trust.identity {
                builder = builder.identity(identity.clone());
            }
            if trust.replaces_built_in_roots() {
                builder = builder.tls_built_in_root_certs(false);
            }
            for cert in &trust.root_certificates {
                builder = builder.add_root_certificate(cert.clone());
            }
        }

        builder
            .build()
            .map_err(|e| GrafanaError::config(format!("failed to build HTTP client: {e}")))
    }
}

/// Return a copy of `base` with TLS trust overridden when `tls` is present.
///
/// The base transport is never modified.
///
/// # Errors
///
/// Propagates [`resolve`] failures.
pub fn wrap_transport(base: &HttpTransport, tls: Option<&TlsConfig>) -> Result<HttpTransport> {
    let mut wrapped = base.clone();
    if let Some(trust) = resolve(tls)? {
        wrapped.trust = Some(trust);
    }
    Ok(wrapped)
}
