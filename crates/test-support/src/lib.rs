//! Helpers shared by the integration test suites.

use anyhow::Context as _;
use std::net::TcpListener;
use std::process::Child;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Kills a spawned server binary when the test that owns it ends.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        if self.0.kill().is_ok() {
            let _ = self.0.wait();
        }
    }
}

/// A localhost port that was free a moment ago. Nothing holds it, so a race is possible.
///
/// # Errors
///
/// Returns an error if no ephemeral port can be bound.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind port listener")?;
    let port = listener.local_addr().context("port listener address")?.port();
    Ok(port)
}

/// Poll `url` until it answers with a 2xx or 3xx status.
///
/// # Errors
///
/// Returns an error if `deadline` passes first.
pub async fn wait_http_ok(url: &str, deadline: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let poll = async {
        loop {
            let ready = client
                .get(url)
                .send()
                .await
                .is_ok_and(|r| r.status().is_success() || r.status().is_redirection());
            if ready {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    tokio::time::timeout(deadline, poll)
        .await
        .with_context(|| format!("{url} not ready after {deadline:?}"))
}

/// A stand-in Grafana served by an axum router on an ephemeral localhost port.
///
/// The server shuts down when the value is dropped.
pub struct MockUpstream {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockUpstream {
    /// Serve `router` on `127.0.0.1:0`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start(router: axum::Router) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind mock upstream")?;
        let addr = listener.local_addr().context("mock upstream local_addr")?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let handle = tokio::spawn(async move {
            let _ = server.await;
        });
        Ok(Self {
            base_url: format!("http://{addr}"),
            shutdown: Some(shutdown_tx),
            handle,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}
