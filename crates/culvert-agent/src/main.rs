use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use culvert_agent::{runtime, AgentConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Install crypto provider before any TLS operations
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("culvert_agent=info".parse()?)
                .add_directive("culvert_transport=info".parse()?),
        )
        .init();

    let config = AgentConfig::from_env().context("Failed to load agent configuration")?;

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutting down client...");
        signal_shutdown.cancel();
    });

    runtime::run(config, shutdown).await
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
