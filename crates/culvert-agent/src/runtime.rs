//! Agent connection runtime: connect, authenticate, accept sub-streams,
//! dial local targets, pump.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::HeaderValue;
use tokio_util::sync::CancellationToken;
use tokio_yamux::StreamHandle;

use culvert_common::pump;
use culvert_transport::framed::framed_transport;
use culvert_transport::websocket::{
    websocket_transport, AUTH_TOKEN_HEADER, CLIENT_ID_HEADER, UPGRADE_PATH,
};
use culvert_transport::{mux, read_target_header, write_ident, FrameTransport, MuxHandle, TransportKind};

use crate::config::AgentConfig;
use crate::retry::RetryPolicy;

/// Budget for dialing the server and finishing the transport handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the agent until the retry budget is exhausted or `shutdown` fires.
pub async fn run(config: AgentConfig, shutdown: CancellationToken) -> Result<()> {
    tracing::info!("Client ID: {}", config.client_id);
    tracing::info!("Server Address: {}", config.server_address);

    let mut policy = RetryPolicy::new(config.reconnect_delay, config.max_retries);

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        tracing::info!(
            "Connecting to server (attempt {}/{})...",
            policy.current_attempt(),
            policy.max_retries()
        );

        let started = Instant::now();
        match connect_and_serve(&config, &shutdown).await {
            // Clean return only happens on cooperative shutdown
            Ok(()) => break,
            Err(e) => {
                tracing::error!("Connection error: {}", e);

                match policy.next_delay(started.elapsed()) {
                    Some(delay) if !shutdown.is_cancelled() => {
                        tracing::info!("Reconnecting in {:?}...", delay);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.cancelled() => break,
                        }
                    }
                    _ => break,
                }
            }
        }
    }

    tracing::info!("Client stopped");
    Ok(())
}

/// One connection lifetime: transport setup, bootstrap, then the sub-stream
/// accept loop until the session dies or shutdown is requested.
pub async fn connect_and_serve(config: &AgentConfig, shutdown: &CancellationToken) -> Result<()> {
    let transport = tokio::time::timeout(CONNECT_TIMEOUT, async {
        match config.transport {
            TransportKind::Framed => connect_framed(config).await,
            TransportKind::WebSocket => connect_websocket(config).await,
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("connection to {} timed out", config.server_address))??;

    tracing::info!("Connected to server successfully");

    let mut mux = MuxHandle::spawn_client(transport);

    // In-band bootstrap on the framed transport: the first sub-stream
    // carries the client id. The WebSocket handshake already carried the
    // credentials in its headers.
    if config.transport == TransportKind::Framed {
        let mut bootstrap = mux::open_substream(&mux.control())
            .await
            .context("failed to open bootstrap stream")?;
        write_ident(&mut bootstrap, &config.client_id)
            .await
            .context("failed to send client id")?;
        bootstrap.shutdown().await.ok();
    }

    tracing::info!("Ready to accept connections");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                mux::close_session(&mux.control()).await;
                return Ok(());
            }
            stream = mux.accept() => match stream {
                Some(stream) => {
                    tokio::spawn(handle_stream(stream));
                }
                None => anyhow::bail!("session closed"),
            },
        }
    }
}

/// Serve one server-opened sub-stream: read the target header, dial the
/// target, pump until either side closes. A dial failure just closes the
/// sub-stream.
async fn handle_stream(mut stream: StreamHandle) {
    let target = match read_target_header(&mut stream).await {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!("Failed to read target header: {}", e);
            return;
        }
    };

    tracing::info!("New connection -> {}", target);

    let local = match TcpStream::connect(&target).await {
        Ok(local) => local,
        Err(e) => {
            tracing::warn!("Failed to connect to {}: {}", target, e);
            return;
        }
    };

    pump(stream, local).await;
}

async fn connect_framed(config: &AgentConfig) -> Result<FrameTransport> {
    let tcp = TcpStream::connect(&config.server_address)
        .await
        .with_context(|| format!("failed to connect to {}", config.server_address))?;

    if config.tls.enabled {
        let connector = tls_connector(config)?;
        let server_name = server_name(config)?;
        let tls = connector
            .connect(server_name, tcp)
            .await
            .context("TLS handshake failed")?;
        Ok(framed_transport(tls))
    } else {
        Ok(framed_transport(tcp))
    }
}

async fn connect_websocket(config: &AgentConfig) -> Result<FrameTransport> {
    let scheme = if config.tls.enabled { "wss" } else { "ws" };
    let url = format!("{}://{}{}", scheme, config.server_address, UPGRADE_PATH);

    let mut request = url
        .into_client_request()
        .context("invalid server address for WebSocket upgrade")?;
    request
        .headers_mut()
        .insert(CLIENT_ID_HEADER, HeaderValue::from_str(&config.client_id)?);
    request
        .headers_mut()
        .insert(AUTH_TOKEN_HEADER, HeaderValue::from_str(&config.auth_token)?);

    let tcp = TcpStream::connect(&config.server_address)
        .await
        .with_context(|| format!("failed to connect to {}", config.server_address))?;

    if config.tls.enabled {
        let connector = tls_connector(config)?;
        let server_name = server_name(config)?;
        let tls = connector
            .connect(server_name, tcp)
            .await
            .context("TLS handshake failed")?;
        let (ws, _response) = tokio_tungstenite::client_async(request, tls)
            .await
            .context("WebSocket upgrade failed")?;
        Ok(websocket_transport(ws))
    } else {
        let (ws, _response) = tokio_tungstenite::client_async(request, tcp)
            .await
            .context("WebSocket upgrade failed")?;
        Ok(websocket_transport(ws))
    }
}

fn tls_connector(config: &AgentConfig) -> Result<TlsConnector> {
    let client_config = match (&config.tls.cert_file, &config.tls.key_file) {
        (Some(cert_file), Some(key_file)) => {
            culvert_common::load_client_config_mutual(cert_file, key_file, &config.tls.ca_file)?
        }
        _ => culvert_common::load_client_config(&config.tls.ca_file)?,
    };
    Ok(TlsConnector::from(Arc::new(client_config)))
}

fn server_name(config: &AgentConfig) -> Result<ServerName<'static>> {
    ServerName::try_from(config.server_host().to_string())
        .map_err(|_| anyhow::anyhow!("invalid server hostname: {}", config.server_host()))
}
