//! Per-client session runtime: the multiplexer handle, the live listener
//! set, and the reload protocol that keeps listeners in sync with the
//! catalog.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_yamux::Control;
use uuid::Uuid;

use culvert_catalog::{Catalog, CatalogError, PortMapping};
use culvert_common::pump;
use culvert_transport::{mux, write_target_header, MuxHandle};

use crate::manager::SessionManager;

/// A bound public port forwarding into one client session.
///
/// The accept task owns the socket; cancelling the token makes the task
/// exit and drop it.
struct PortListener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// State for one connected client.
pub struct ClientSession {
    client_id: String,
    /// Distinguishes this connection from a replacement with the same id.
    epoch: Uuid,
    control: Control,
    closed: CancellationToken,
    catalog: Catalog,
    /// Listener set keyed by exposed port. The lock doubles as the reload
    /// lock: concurrent reloads queue here.
    listeners: Mutex<HashMap<u16, PortListener>>,
}

impl ClientSession {
    pub fn new(
        client_id: String,
        control: Control,
        closed: CancellationToken,
        catalog: Catalog,
    ) -> Self {
        Self {
            client_id,
            epoch: Uuid::new_v4(),
            control,
            closed,
            catalog,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn epoch(&self) -> Uuid {
        self.epoch
    }

    /// Synchronise the listener set with the catalog.
    ///
    /// Removed ports are closed before their entries leave the map, so no
    /// accept can succeed on a port the catalog no longer grants. A bind
    /// failure is logged and skipped; the next reload retries it. Kept
    /// ports and their in-flight connections are untouched.
    pub async fn reload(&self) -> Result<(), CatalogError> {
        // Catalog read happens before taking the reload lock; the lock is
        // only held across listener bind and close.
        let desired: HashMap<u16, PortMapping> = self
            .catalog
            .enabled_ports(&self.client_id)
            .await?
            .into_iter()
            .map(|mapping| (mapping.exposed_port, mapping))
            .collect();

        let mut listeners = self.listeners.lock().await;

        let removed: Vec<u16> = listeners
            .keys()
            .filter(|port| !desired.contains_key(port))
            .copied()
            .collect();
        for port in removed {
            if let Some(entry) = listeners.get_mut(&port) {
                tracing::info!("Closing port {} (removed)", port);
                entry.cancel.cancel();
                let _ = (&mut entry.task).await;
            }
            listeners.remove(&port);
        }

        for (port, mapping) in desired {
            if listeners.contains_key(&port) {
                continue;
            }
            match self.bind_listener(&mapping).await {
                Ok(entry) => {
                    listeners.insert(port, entry);
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to expose port {} for {}: {}",
                        port,
                        self.client_id,
                        e
                    );
                }
            }
        }

        Ok(())
    }

    async fn bind_listener(&self, mapping: &PortMapping) -> std::io::Result<PortListener> {
        let addr = SocketAddr::from(([0, 0, 0, 0], mapping.exposed_port));
        let listener = TcpListener::bind(addr).await?;

        let target = mapping.target();
        tracing::info!("Listening on port {} -> {}", mapping.exposed_port, target);

        let cancel = self.closed.child_token();
        let task = tokio::spawn(accept_loop(
            listener,
            mapping.exposed_port,
            target,
            self.control.clone(),
            cancel.clone(),
        ));

        Ok(PortListener { cancel, task })
    }

    /// Exposed ports with a live listener, ascending.
    pub async fn active_ports(&self) -> Vec<u16> {
        let listeners = self.listeners.lock().await;
        let mut ports: Vec<u16> = listeners.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Close the multiplexer session, which tears the whole session down
    /// through the connection handler's unregister path.
    pub async fn close_mux(&self) {
        mux::close_session(&self.control).await;
    }

    /// Close every listener and the multiplexer session.
    pub async fn shutdown(&self) {
        self.closed.cancel();

        let mut listeners = self.listeners.lock().await;
        for (port, mut entry) in listeners.drain() {
            entry.cancel.cancel();
            let _ = (&mut entry.task).await;
            tracing::info!("Closed port {}", port);
        }
        drop(listeners);

        mux::close_session(&self.control).await;
    }
}

/// Accept loop for one exposed port.
///
/// Transient accept errors are logged and the loop continues; only
/// cancellation ends it. A sub-stream open failure closes the inbound
/// connection and keeps accepting.
async fn accept_loop(
    listener: TcpListener,
    port: u16,
    target: String,
    control: Control,
    cancel: CancellationToken,
) {
    loop {
        let conn = tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok((conn, peer)) => {
                    tracing::debug!("Connection on port {} from {}", port, peer);
                    conn
                }
                Err(e) => {
                    tracing::warn!("Accept error on port {}: {}", port, e);
                    continue;
                }
            },
        };

        // Per-connection work runs in its own task so listener teardown
        // never waits out a slow sub-stream open
        tokio::spawn(forward_connection(conn, port, target.clone(), control.clone()));
    }
}

/// Steer one accepted connection into a fresh sub-stream and pump it.
async fn forward_connection(conn: TcpStream, port: u16, target: String, control: Control) {
    let mut stream = match mux::open_substream(&control).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("Failed to open sub-stream for port {}: {}", port, e);
            return;
        }
    };

    // The target header must be on the wire before any payload byte; it is
    // written before the pump exists.
    if let Err(e) = write_target_header(&mut stream, &target).await {
        tracing::warn!("Failed to send target header for port {}: {}", port, e);
        return;
    }

    pump(conn, stream).await;
}

/// Run a freshly authenticated session until its multiplexer dies.
///
/// Registers with the manager (replacing any previous session for the id),
/// loads the initial listener set, then waits out the session and
/// unregisters. Inbound sub-streams after the bootstrap are drained and
/// dropped so the session driver keeps moving.
pub async fn attach_session(
    manager: &Arc<SessionManager>,
    catalog: &Catalog,
    mut mux: MuxHandle,
    client_id: String,
) {
    let session = Arc::new(ClientSession::new(
        client_id.clone(),
        mux.control(),
        mux.closed(),
        catalog.clone(),
    ));
    let epoch = session.epoch();

    manager.register(session.clone()).await;

    if let Err(e) = catalog.touch_last_seen(&client_id).await {
        tracing::warn!("Failed to update last seen for {}: {}", client_id, e);
    }

    if let Err(e) = session.reload().await {
        tracing::error!("Failed to load ports for {}: {}", client_id, e);
    }

    let closed = mux.closed();
    tokio::spawn(async move { while mux.accept().await.is_some() {} });

    closed.cancelled().await;
    tracing::info!("Client {} disconnected", client_id);

    manager.unregister(&client_id, epoch).await;
}
