//! Multiplexer session setup.
//!
//! The yamux session multiplexes sub-streams over one [`FrameStream`]. A
//! driver task polls the session for its whole life: inbound sub-streams are
//! forwarded to the handle's channel, and the session's death is signalled
//! through a cancellation token. Sub-stream opens go through the cloneable
//! [`Control`], so accept loops never need the session itself.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_yamux::{Config, Control, Session, StreamHandle};

use crate::adapter::FrameStream;
use crate::{FrameTransport, TransportError};

/// Keepalive ping interval on the multiplexed connection.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Timeout on writes to the underlying connection.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for opening a new sub-stream.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(60);

fn session_config() -> Config {
    let mut config = Config::default();
    config.enable_keepalive = true;
    config.keepalive_interval = KEEPALIVE_INTERVAL;
    config.connection_write_timeout = WRITE_TIMEOUT;
    config
}

/// Handle to a live multiplexer session.
pub struct MuxHandle {
    control: Control,
    incoming: mpsc::Receiver<StreamHandle>,
    closed: CancellationToken,
}

impl MuxHandle {
    /// Start the server side of a session over an established transport.
    pub fn spawn_server(transport: FrameTransport) -> Self {
        let io = FrameStream::new(transport);
        Self::spawn(Session::new_server(io, session_config()))
    }

    /// Start the client side of a session over an established transport.
    pub fn spawn_client(transport: FrameTransport) -> Self {
        let io = FrameStream::new(transport);
        Self::spawn(Session::new_client(io, session_config()))
    }

    fn spawn(mut session: Session<FrameStream>) -> Self {
        let control = session.control();
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let closed = CancellationToken::new();
        let token = closed.clone();

        tokio::spawn(async move {
            loop {
                match session.next().await {
                    Some(Ok(stream)) => {
                        // The driver must keep polling even when nobody is
                        // accepting, otherwise opens stall too
                        if inbound_tx.send(stream).await.is_err() {
                            continue;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!("Multiplexer session ended: {}", e);
                        break;
                    }
                    None => break,
                }
            }
            token.cancel();
        });

        Self {
            control,
            incoming: inbound_rx,
            closed,
        }
    }

    /// Clone the control handle used to open sub-streams and close the
    /// session.
    pub fn control(&self) -> Control {
        self.control.clone()
    }

    /// Token cancelled when the session dies (remote close, transport error
    /// or local shutdown).
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Accept the next inbound sub-stream. Returns `None` once the session
    /// is gone and all buffered sub-streams have been drained.
    pub async fn accept(&mut self) -> Option<StreamHandle> {
        self.incoming.recv().await
    }
}

/// Open a sub-stream through a session control handle, bounded by
/// [`OPEN_TIMEOUT`].
pub async fn open_substream(control: &Control) -> Result<StreamHandle, TransportError> {
    let mut control = control.clone();
    match tokio::time::timeout(OPEN_TIMEOUT, control.open_stream()).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::Mux(e.to_string())),
        Err(_) => Err(TransportError::OpenTimeout),
    }
}

/// Close a session through its control handle.
pub async fn close_session(control: &Control) {
    let mut control = control.clone();
    let _ = control.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framed::framed_transport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn session_pair() -> (MuxHandle, MuxHandle) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = MuxHandle::spawn_server(framed_transport(server_io));
        let client = MuxHandle::spawn_client(framed_transport(client_io));
        (server, client)
    }

    #[tokio::test]
    async fn test_open_and_accept_substream() {
        let (server, mut client) = session_pair();

        let mut outbound = open_substream(&server.control()).await.unwrap();
        outbound.write_all(b"down the pipe").await.unwrap();
        outbound.flush().await.unwrap();

        let mut inbound = client.accept().await.expect("no inbound stream");
        let mut buf = [0u8; 13];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"down the pipe");
    }

    #[tokio::test]
    async fn test_substreams_are_independent() {
        let (server, mut client) = session_pair();
        let control = server.control();

        let mut first = open_substream(&control).await.unwrap();
        let mut second = open_substream(&control).await.unwrap();

        second.write_all(b"second").await.unwrap();
        second.flush().await.unwrap();
        first.write_all(b"first").await.unwrap();
        first.flush().await.unwrap();

        let mut in_first = client.accept().await.unwrap();
        let mut in_second = client.accept().await.unwrap();

        let mut buf = [0u8; 5];
        in_first.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"first");

        let mut buf = [0u8; 6];
        in_second.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"second");
    }

    #[tokio::test]
    async fn test_close_cancels_peer() {
        let (server, client) = session_pair();

        close_session(&server.control()).await;

        tokio::time::timeout(Duration::from_secs(5), client.closed().cancelled())
            .await
            .expect("peer session did not observe close");
    }
}
