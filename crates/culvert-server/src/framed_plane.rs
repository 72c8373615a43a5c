//! Accept plane for the framed transport.
//!
//! Clients dial in over TCP (TLS when configured), a multiplexer session is
//! set up over length-prefixed frames, and the first sub-stream carries the
//! client id (in-band bootstrap). The trust anchor for that id is the
//! transport handshake: run this plane behind mutual TLS outside of tests.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use culvert_catalog::Catalog;
use culvert_transport::framed::framed_transport;
use culvert_transport::{mux, read_ident, MuxHandle, OPEN_TIMEOUT};

use crate::auth::Authenticator;
use crate::manager::SessionManager;
use crate::session::attach_session;

pub struct FramedPlane {
    manager: Arc<SessionManager>,
    catalog: Catalog,
    auth: Authenticator,
    tls_acceptor: Option<TlsAcceptor>,
}

impl FramedPlane {
    pub fn new(
        manager: Arc<SessionManager>,
        catalog: Catalog,
        auth: Authenticator,
        tls_acceptor: Option<TlsAcceptor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            catalog,
            auth,
            tls_acceptor,
        })
    }

    /// Bind and serve client connections.
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Framed plane listening on {}", addr);
        self.run_with_listener(listener).await
    }

    /// Serve client connections on an already-bound listener.
    pub async fn run_with_listener(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let this = self.clone();

            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(stream, peer_addr).await {
                    tracing::error!("Connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        tracing::info!("New client connection from {}", peer_addr);

        let transport = match &self.tls_acceptor {
            Some(acceptor) => framed_transport(acceptor.accept(stream).await?),
            None => framed_transport(stream),
        };

        let mut mux = MuxHandle::spawn_server(transport);

        // In-band bootstrap: the first sub-stream carries the client id
        let mut bootstrap = match tokio::time::timeout(OPEN_TIMEOUT, mux.accept()).await {
            Ok(Some(stream)) => stream,
            Ok(None) => anyhow::bail!("session closed before bootstrap"),
            Err(_) => anyhow::bail!("timed out waiting for bootstrap stream"),
        };
        let client_id = read_ident(&mut bootstrap).await?;
        drop(bootstrap);

        let client = match self.auth.verify_identity(&client_id).await {
            Ok(client) => client,
            Err(e) => {
                // The peer only sees the transport close
                tracing::warn!("Rejected client {} from {}: {}", client_id, peer_addr, e);
                mux::close_session(&mux.control()).await;
                return Ok(());
            }
        };

        tracing::info!("Client {} ({}) connected", client_id, client.client_name);

        attach_session(&self.manager, &self.catalog, mux, client_id).await;
        Ok(())
    }
}
