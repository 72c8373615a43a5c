//! Process-wide registry of client sessions.
//!
//! The only process-wide mutable state in the server: a readers-writer
//! locked map from client id to session. Constructed once at startup and
//! passed into every handler that needs it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use culvert_catalog::CatalogError;

use crate::session::ClientSession;

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<ClientSession>>>,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Register a session, replacing and closing any existing session for
    /// the same client id.
    pub async fn register(&self, session: Arc<ClientSession>) {
        let client_id = session.client_id().to_string();

        let previous = self.sessions.write().remove(&client_id);
        if let Some(previous) = previous {
            tracing::info!("Replacing existing session for {}", client_id);
            previous.shutdown().await;
        }

        self.sessions.write().insert(client_id, session);
    }

    /// Remove and close a session, but only while it is still the
    /// registered one. A replaced session's late teardown must not take
    /// down its successor.
    pub async fn unregister(&self, client_id: &str, epoch: Uuid) {
        let removed = {
            let mut sessions = self.sessions.write();
            match sessions.get(client_id) {
                Some(current) if current.epoch() == epoch => sessions.remove(client_id),
                _ => None,
            }
        };

        if let Some(session) = removed {
            session.shutdown().await;
        }
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().get(client_id).cloned()
    }

    /// Reload a connected client's listener set. Returns `false` (a no-op)
    /// when the client is not connected.
    pub async fn reload(&self, client_id: &str) -> Result<bool, CatalogError> {
        match self.get(client_id) {
            Some(session) => {
                session.reload().await?;
                Ok(true)
            }
            None => {
                tracing::info!("Client {} not connected", client_id);
                Ok(false)
            }
        }
    }

    /// Ids of all connected clients, sorted.
    pub fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
