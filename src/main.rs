use kcp_relay::metrics::format_metrics;
use kcp_relay::{Relay, RelayConfig};

use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries relayed data, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Relay failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> kcp_relay::Result<()> {
    let config = RelayConfig::from_env()?;
    info!(
        local = %config.local_addr,
        peer = %config.peer_addr,
        conv = config.conv,
        "Starting relay"
    );

    let relay = Relay::bind_stdio(config).await?;
    let snapshot = relay
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("{}", format_metrics(&snapshot));
    Ok(())
}
