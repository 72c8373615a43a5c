use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing_subscriber::EnvFilter;

use culvert_catalog::Catalog;
use culvert_server::{Authenticator, ControlChannel, FramedPlane, ServerConfig, SessionManager, WsPlane};
use culvert_transport::TransportKind;

#[tokio::main]
async fn main() -> Result<()> {
    // Install crypto provider before any TLS operations
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("culvert_server=info".parse()?)
                .add_directive("culvert_transport=info".parse()?)
                .add_directive("culvert_catalog=info".parse()?),
        )
        .init();

    let config = ServerConfig::from_env().context("Failed to load server configuration")?;
    tracing::info!("Starting culvert server ({:?} transport)", config.transport);

    let catalog = Catalog::open(&config.db_path)
        .await
        .with_context(|| format!("Failed to open catalog at {}", config.db_path.display()))?;
    tracing::info!("Catalog ready at {}", config.db_path.display());

    let manager = SessionManager::new();
    let auth = Authenticator::new(catalog.clone());

    let control = ControlChannel::bind(&config.control_socket, manager.clone())
        .await
        .context("Failed to start control socket")?;

    let tls_acceptor = if config.tls.enabled {
        let server_config = match &config.tls.ca_file {
            Some(ca_file) => {
                tracing::info!("TLS enabled with client certificate verification");
                culvert_common::load_server_config(
                    &config.tls.cert_file,
                    &config.tls.key_file,
                    ca_file,
                )?
            }
            None => {
                tracing::info!("TLS enabled");
                culvert_common::load_server_config_no_client_auth(
                    &config.tls.cert_file,
                    &config.tls.key_file,
                )?
            }
        };
        Some(TlsAcceptor::from(Arc::new(server_config)))
    } else {
        tracing::warn!("TLS disabled; client identity is unverified");
        None
    };

    let listener = TcpListener::bind((config.address.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.address, config.port))?;
    tracing::info!("Server listening on {}:{}", config.address, config.port);
    tracing::info!("Waiting for authorized clients...");

    match config.transport {
        TransportKind::Framed => {
            let plane = FramedPlane::new(manager, catalog, auth, tls_acceptor);
            tokio::select! {
                result = plane.run_with_listener(listener) => {
                    tracing::error!("Framed plane stopped: {:?}", result);
                    result?;
                }
                _ = shutdown_signal() => {}
            }
        }
        TransportKind::WebSocket => {
            let plane = WsPlane::new(manager, catalog, auth, tls_acceptor);
            tokio::select! {
                result = plane.run_with_listener(listener) => {
                    tracing::error!("WebSocket plane stopped: {:?}", result);
                    result?;
                }
                _ = shutdown_signal() => {}
            }
        }
    }

    control.shutdown();
    tracing::info!("Server shutdown complete");
    Ok(())
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
