//! In-memory map of online users to their live WebSocket connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use courier_shared::protocol::ServerFrame;
use courier_shared::UserId;

/// Outbound half of one WebSocket. Cloning shares the same socket and the
/// same close signal.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    pub user_id: UserId,
    tx: mpsc::Sender<ServerFrame>,
    closed: Arc<watch::Sender<bool>>,
}

impl Connection {
    pub fn new(user_id: UserId, tx: mpsc::Sender<ServerFrame>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
            closed: Arc::new(closed),
        }
    }

    /// Ask the owning session to shut down.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once `close` has been called on any clone.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Queue `frame` for the writer task, waiting at most `timeout` for room.
    /// On failure the frame is handed back.
    pub async fn send(&self, frame: ServerFrame, timeout: Duration) -> Result<(), ServerFrame> {
        self.tx.send_timeout(frame, timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(frame) | SendTimeoutError::Closed(frame) => frame,
        })
    }
}

/// One map for all users, one lock for the map. The lock is never held across
/// an await point.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<UserId, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<UserId, Connection>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make `conn` the live connection for its user. Returns the connection it
    /// displaced, which is left open for its owner to tear down.
    pub fn register(&self, conn: Connection) -> Option<Connection> {
        let displaced = self.map().insert(conn.user_id, conn.clone());
        tracing::debug!(user = %conn.user_id, connection = %conn.id, displaced = displaced.is_some(), "connection registered");
        displaced
    }

    pub fn lookup(&self, user: UserId) -> Option<Connection> {
        self.map().get(&user).cloned()
    }

    pub fn remove(&self, user: UserId) -> Option<Connection> {
        self.map().remove(&user)
    }

    /// Remove `user`'s entry only if it is still `connection_id`.
    pub fn remove_if_current(&self, user: UserId, connection_id: Uuid) -> bool {
        let mut map = self.map();
        match map.get(&user) {
            Some(conn) if conn.id == connection_id => {
                map.remove(&user);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }
}
