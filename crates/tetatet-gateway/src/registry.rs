use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// One live connection as the rest of the gateway sees it: an outbound
/// channel of serialized frames plus the user binding established by
/// `authenticate`. The user is held as a lookup key only — profile data is
/// re-fetched from storage when needed, never cached here.
pub struct ConnectionHandle {
    id: Uuid,
    user_id: StdRwLock<Option<Uuid>>,
    outbound: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: StdRwLock::new(None),
            outbound,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Option<Uuid> {
        *self.user_id.read().expect("user binding lock poisoned")
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }

    fn bind(&self, user: Uuid) {
        *self.user_id.write().expect("user binding lock poisoned") = Some(user);
    }

    /// Open means the write half is still draining our channel. This is a
    /// snapshot; senders must handle `send` failing anyway.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queue a frame for this connection. Returns false if the connection
    /// has gone away; the caller is expected to unregister it.
    pub fn send(&self, frame: String) -> bool {
        self.outbound.send(frame).is_ok()
    }
}

/// The shared table of live connections. The one piece of truly shared
/// mutable state in the gateway; everything goes through this API, the
/// raw map is never exposed.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, handle: Arc<ConnectionHandle>) {
        self.connections.write().await.insert(handle.id(), handle);
    }

    /// Remove a connection. Safe to call for never-authenticated or already
    /// removed connections; returns the bound user id if there was one so
    /// the caller can run the presence-offline path.
    pub async fn unregister(&self, conn_id: Uuid) -> Option<Uuid> {
        let handle = self.connections.write().await.remove(&conn_id)?;
        handle.user_id()
    }

    /// Bind an authenticated user to a connection. Returns false if the
    /// connection disappeared in the meantime.
    pub async fn bind_user(&self, conn_id: Uuid, user: Uuid) -> bool {
        match self.connections.read().await.get(&conn_id) {
            Some(handle) => {
                handle.bind(user);
                true
            }
            None => false,
        }
    }

    /// Snapshot of every open connection bound to `user`. Zero entries
    /// means offline; more than one means multiple devices.
    pub async fn find_live(&self, user: Uuid) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.is_open() && c.user_id() == Some(user))
            .cloned()
            .collect()
    }

    pub async fn is_online(&self, user: Uuid) -> bool {
        self.connections
            .read()
            .await
            .values()
            .any(|c| c.is_open() && c.user_id() == Some(user))
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
