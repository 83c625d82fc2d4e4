//! Error taxonomy shared by the core and every tool.

use crate::safety::sanitize_reqwest_error;
use std::fmt;
use thiserror::Error;

/// Errors surfaced while resolving configuration or talking to Grafana.
///
/// `Display` is the human-readable message only; the kind is reported separately via
/// [`GrafanaError::kind`] so transports can render it as structured data.
#[derive(Debug, Error)]
pub enum GrafanaError {
    /// Malformed or contradictory configuration (bad URL, half-supplied pairs, unreadable TLS files).
    #[error("{0}")]
    Config(String),

    /// A pre-flight lookup (datasource, plugin settings) failed or returned not-found.
    #[error("{0}")]
    UpstreamLookup(String),

    /// The main upstream call failed: non-2xx status, transport failure or unusable body.
    #[error("{message}")]
    UpstreamCall {
        status: Option<u16>,
        message: String,
    },

    /// Tool input rejected before any network call.
    #[error("{0}")]
    Argument(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, GrafanaError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    UpstreamLookup,
    UpstreamCall,
    Argument,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config_error",
            Self::UpstreamLookup => "upstream_lookup_error",
            Self::UpstreamCall => "upstream_call_error",
            Self::Argument => "argument_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GrafanaError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::UpstreamLookup(_) => ErrorKind::UpstreamLookup,
            Self::UpstreamCall { .. } => ErrorKind::UpstreamCall,
            Self::Argument(_) => ErrorKind::Argument,
        }
    }

    /// Upstream HTTP status, when the failure came from a response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UpstreamCall { status, .. } => *status,
            _ => None,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::UpstreamLookup(msg.into())
    }

    /// An upstream failure that is not tied to a response status (decode errors, bad payloads).
    pub fn call(msg: impl Into<String>) -> Self {
        Self::UpstreamCall {
            status: None,
            message: msg.into(),
        }
    }

    /// Prefix the message with the operation that failed, keeping the kind and status.
    #[must_use]
    pub fn context(self, operation: impl fmt::Display) -> Self {
        match self {
            Self::Config(m) => Self::Config(format!("{operation}: {m}")),
            Self::UpstreamLookup(m) => Self::UpstreamLookup(format!("{operation}: {m}")),
            Self::UpstreamCall { status, message } => Self::UpstreamCall {
                status,
                message: format!("{operation}: {message}"),
            },
            Self::Argument(m) => Self::Argument(format!("{operation}: {m}")),
        }
    }
}

impl From<reqwest::Error> for GrafanaError {
    fn from(value: reqwest::Error) -> Self {
        Self::UpstreamCall {
            status: value.status().map(|s| s.as_u16()),
            message: sanitize_reqwest_error(&value),
        }
    }
}

/// Extension for attaching operation context to a `Result`.
pub trait ResultExt<T> {
    /// # Errors
    ///
    /// Returns the original error with `operation` prefixed to its message.
    fn context(self, operation: impl fmt::Display) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, operation: impl fmt::Display) -> Result<T> {
        self.map_err(|e| e.context(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind_and_status() {
        let err = GrafanaError::UpstreamCall {
            status: Some(404),
            message: "not found".to_string(),
        }
        .context("get dashboard 'abc'");
        assert_eq!(err.kind(), ErrorKind::UpstreamCall);
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "get dashboard 'abc': not found");
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(GrafanaError::config("x").kind().as_str(), "config_error");
        assert_eq!(
            GrafanaError::lookup("x").kind().as_str(),
            "upstream_lookup_error"
        );
        assert_eq!(GrafanaError::call("x").kind().as_str(), "upstream_call_error");
        assert_eq!(GrafanaError::argument("x").kind().as_str(), "argument_error");
    }

    #[test]
    fn result_ext_prefixes_errors() {
        let r: Result<()> = Err(GrafanaError::argument("limit must not be negative"));
        let err = r.context("list alert rules").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(err.to_string(), "list alert rules: limit must not be negative");
    }
}
