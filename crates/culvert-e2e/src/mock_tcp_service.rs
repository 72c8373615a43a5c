//! Mock TCP service standing in for the target behind the agent.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Behavior mode for the mock TCP service
#[derive(Clone, Debug)]
pub enum TcpServiceMode {
    /// Echo back all received data
    Echo,
    /// Read once, send a fixed response, then close
    FixedResponse(Vec<u8>),
}

/// A recorded connection
#[derive(Clone, Debug)]
pub struct RecordedConnection {
    /// All data received on this connection
    pub received_data: Vec<u8>,
    /// Peer address
    pub peer_addr: SocketAddr,
}

/// A mock TCP service for testing
pub struct MockTcpService {
    addr: SocketAddr,
    connections: Arc<RwLock<Vec<RecordedConnection>>>,
    cancel: CancellationToken,
}

impl MockTcpService {
    /// Start an echo service on an ephemeral port
    pub async fn start() -> Self {
        Self::start_with_mode(TcpServiceMode::Echo).await
    }

    /// Start a service with a specific mode
    pub async fn start_with_mode(mode: TcpServiceMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock TCP service");
        let addr = listener.local_addr().unwrap();

        let connections: Arc<RwLock<Vec<RecordedConnection>>> =
            Arc::new(RwLock::new(Vec::new()));
        let cancel = CancellationToken::new();

        let accept_connections = connections.clone();
        let accept_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    result = listener.accept() => match result {
                        Ok((stream, peer_addr)) => {
                            let connections = accept_connections.clone();
                            let mode = mode.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, peer_addr, connections, mode).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!("Mock service accept error: {}", e);
                            break;
                        }
                    },
                }
            }
        });

        Self {
            addr,
            connections,
            cancel,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn get_connections(&self) -> Vec<RecordedConnection> {
        self.connections.read().clone()
    }

    pub fn total_bytes_received(&self) -> usize {
        self.connections
            .read()
            .iter()
            .map(|c| c.received_data.len())
            .sum()
    }
}

impl Drop for MockTcpService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    connections: Arc<RwLock<Vec<RecordedConnection>>>,
    mode: TcpServiceMode,
) {
    let mut received_data = Vec::new();
    let mut buf = [0u8; 4096];

    match mode {
        TcpServiceMode::Echo => loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    received_data.extend_from_slice(&buf[..n]);
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        },
        TcpServiceMode::FixedResponse(response) => {
            if let Ok(n) = stream.read(&mut buf).await {
                received_data.extend_from_slice(&buf[..n]);
            }
            let _ = stream.write_all(&response).await;
        }
    }

    connections.write().push(RecordedConnection {
        received_data,
        peer_addr,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_echo_mode() {
        let service = MockTcpService::start().await;

        let mut stream = TcpStream::connect(service.addr()).await.unwrap();
        stream.write_all(b"hello mock").await.unwrap();

        let mut buf = [0u8; 32];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello mock");

        drop(stream);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(service.connection_count(), 1);
        assert_eq!(service.total_bytes_received(), 10);
    }

    #[tokio::test]
    async fn test_fixed_response_mode() {
        let service =
            MockTcpService::start_with_mode(TcpServiceMode::FixedResponse(b"PONG".to_vec())).await;

        let mut stream = TcpStream::connect(service.addr()).await.unwrap();
        stream.write_all(b"PING").await.unwrap();

        let mut buf = [0u8; 32];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"PONG");
    }
}
