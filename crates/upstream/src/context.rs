//! The request-scoped carrier of resolved configuration.

use crate::config::{ExecutionConfig, OnBehalfOf};
use crate::error::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Resolved configuration plus the cancellation signal for one request or session.
///
/// Contexts are values: `attach` and `with_on_behalf_of` return a derived context and leave
/// the receiver untouched, so a context handed to one request can never observe another
/// request's configuration. Cloning is cheap.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    config: Option<Arc<ExecutionConfig>>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    /// A root context with nothing attached and a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            config: None,
            cancel,
        }
    }

    /// Derive a context carrying `config`, shadowing anything attached to `self`.
    #[must_use]
    pub fn attach(&self, config: ExecutionConfig) -> Self {
        Self {
            config: Some(Arc::new(config)),
            cancel: self.cancel.clone(),
        }
    }

    /// The attached configuration, or the zero value when nothing was attached.
    ///
    /// The zero value has an empty base URL; readers go through
    /// [`ExecutionConfig::effective_base_url`] to get the platform default.
    #[must_use]
    pub fn resolve(&self) -> Arc<ExecutionConfig> {
        self.config
            .clone()
            .unwrap_or_else(|| Arc::new(ExecutionConfig::default()))
    }

    /// Derive a context whose configuration carries an on-behalf-of token pair.
    ///
    /// # Errors
    ///
    /// Returns a config error if either token is empty.
    pub fn with_on_behalf_of(&self, access_token: &str, id_token: &str) -> Result<Self> {
        let tokens = OnBehalfOf::new(access_token, id_token)?;
        let config = self.resolve().as_ref().clone().with_on_behalf_of(tokens);
        Ok(self.attach(config))
    }

    /// Derive a context whose cancellation is a child of this one.
    ///
    /// Cancelling the child leaves `self` running; cancelling `self` cancels the child.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            config: self.config.clone(),
            cancel: self.cancel.child_token(),
        }
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
