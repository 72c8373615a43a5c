//! Accept plane for the WebSocket transport.
//!
//! Clients upgrade to `/tunnel` carrying `X-Client-ID` and `X-Auth-Token`
//! headers. Requests with a wrong path or missing headers are rejected in
//! the handshake callback, before the upgrade response is written; the
//! secret itself is checked against the catalog right after the handshake,
//! before any session state exists.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use culvert_catalog::Catalog;
use culvert_transport::websocket::{
    websocket_transport, AUTH_TOKEN_HEADER, CLIENT_ID_HEADER, UPGRADE_PATH,
};
use culvert_transport::MuxHandle;

use crate::auth::Authenticator;
use crate::manager::SessionManager;
use crate::session::attach_session;

pub struct WsPlane {
    manager: Arc<SessionManager>,
    catalog: Catalog,
    auth: Authenticator,
    tls_acceptor: Option<TlsAcceptor>,
}

impl WsPlane {
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

    /// Bind and serve upgrade requests.
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("WebSocket plane listening on {}", addr);
        self.run_with_listener(listener).await
    }

    /// Serve upgrade requests on an already-bound listener.
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
        match &self.tls_acceptor {
            Some(acceptor) => {
                let tls_stream = acceptor.accept(stream).await?;
                self.upgrade(tls_stream, peer_addr).await
            }
            None => self.upgrade(stream, peer_addr).await,
        }
    }

    async fn upgrade<S>(&self, stream: S, peer_addr: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut client_id = None;
        let mut token = None;

        let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            if req.uri().path() != UPGRADE_PATH {
                return Err(error_response(StatusCode::NOT_FOUND, "not found"));
            }

            client_id = header_value(req, CLIENT_ID_HEADER);
            token = header_value(req, AUTH_TOKEN_HEADER);

            if client_id.is_none() || token.is_none() {
                return Err(error_response(
                    StatusCode::UNAUTHORIZED,
                    "missing credentials",
                ));
            }

            Ok(resp)
        })
        .await?;

        let client_id = client_id.unwrap_or_default();
        let token = token.unwrap_or_default();

        let client = match self.auth.verify_token(&client_id, &token).await {
            Ok(client) => client,
            Err(e) => {
                // Closing the socket is the only signal the peer gets
                tracing::warn!("Rejected client {} from {}: {}", client_id, peer_addr, e);
                drop(ws);
                return Ok(());
            }
        };

        tracing::info!("Client {} ({}) connected", client_id, client.client_name);

        let mux = MuxHandle::spawn_server(websocket_transport(ws));
        attach_session(&self.manager, &self.catalog, mux, client_id).await;
        Ok(())
    }
}

fn error_response(status: StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}

fn header_value(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
