use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;

use parley_core::ids::{ConnectionId, UserId};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

/// A live channel to one device of one user. The user binding is fixed at
/// registration; only liveness state mutates afterwards.
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Connection {
    fn new(id: ConnectionId, user_id: UserId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            user_id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CONNECTION_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Source of truth for "is this user reachable right now". Multi-device: a
/// user owns a set of connections. The registry never decides delivery
/// semantics; it only addresses live channels.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    by_user: DashMap<UserId, Vec<ConnectionId>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            by_user: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new connection for a user. Additive: existing
    /// connections of the same user are untouched.
    pub fn register(&self, user_id: &UserId) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let conn = Arc::new(Connection::new(id.clone(), user_id.clone(), tx));
        self.connections.insert(id.clone(), conn);
        self.by_user
            .entry(user_id.clone())
            .or_default()
            .push(id.clone());
        (id, rx)
    }

    /// Remove a connection. Safe to call repeatedly; a second call is a
    /// no-op.
    pub fn unregister(&self, id: &ConnectionId) {
        if let Some((_, conn)) = self.connections.remove(id) {
            conn.connected.store(false, Ordering::Relaxed);
            if let Some(mut ids) = self.by_user.get_mut(&conn.user_id) {
                ids.retain(|c| c != id);
                let empty = ids.is_empty();
                drop(ids);
                if empty {
                    self.by_user
                        .remove_if(&conn.user_id, |_, ids| ids.is_empty());
                }
            }
        }
    }

    /// All live connection ids for a user (possibly empty).
    pub fn connections_for(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.by_user
            .get(user_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    pub fn is_reachable(&self, user_id: &UserId) -> bool {
        !self.connections_for(user_id).is_empty()
    }

    /// The authenticated user behind a connection.
    pub fn user_of(&self, id: &ConnectionId) -> Option<UserId> {
        self.connections.get(id).map(|c| c.user_id.clone())
    }

    /// Send to one connection. Returns false when the connection is gone,
    /// its socket pump has exited, or its queue is full; the caller skips,
    /// never errors.
    pub fn send_to(&self, id: &ConnectionId, message: String) -> bool {
        let Some(conn) = self.connections.get(id) else {
            return false;
        };
        if !conn.is_connected() {
            return false;
        }
        match conn.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %id,
                    msg_len = msg.len(),
                    "send queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Fan one serialized event out to every live connection of a user.
    /// A connection removed mid-iteration is simply skipped.
    pub fn send_to_user(&self, user_id: &UserId, message: &str) -> usize {
        let mut delivered = 0;
        for id in self.connections_for(user_id) {
            if self.send_to(&id, message.to_string()) {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn record_pong(&self, id: &ConnectionId) {
        if let Some(conn) = self.connections.get(id) {
            conn.record_pong();
        }
    }

    pub fn mark_disconnected(&self, id: &ConnectionId) {
        if let Some(conn) = self.connections.get(id) {
            conn.connected.store(false, Ordering::Relaxed);
        }
    }

    /// Remove connections that stopped answering pings or whose socket
    /// pump already exited.
    pub fn cleanup_dead_connections(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_alive() || !entry.value().is_connected())
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in dead {
            self.unregister(&id);
            removed += 1;
            tracing::info!(connection_id = %id, "cleaned up dead connection");
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn age_connection(&self, id: &ConnectionId) {
        if let Some(conn) = self.connections.get(id) {
            conn.last_pong.store(0, Ordering::Relaxed);
        }
    }
}

/// Start a background task that periodically sweeps dead connections.
pub fn start_cleanup_task(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_connections();
            if removed > 0 {
                tracing::info!(removed = removed, "dead connection sweep");
            }
        }
    })
}
