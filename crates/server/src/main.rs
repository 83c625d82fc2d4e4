use clap::Parser;
use mcp_grafana::cli::Cli;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    mcp_grafana::init_tracing(&cli);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            on_signal.cancel();
        }
    });

    match mcp_grafana::run(cli, shutdown).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("mcp-grafana failed: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}
