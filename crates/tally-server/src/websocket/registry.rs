//! Registry of live connections.

use std::sync::Arc;

use dashmap::DashMap;
use tally_core::ConnectionId;
use tokio::sync::mpsc;

use super::connection::{Connection, Outbound};

pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Create a connection with a fresh identity and register it.
    pub fn register(&self) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let conn = Arc::new(Connection::new(ConnectionId::new(), tx));
        let _ = self.connections.insert(conn.id.clone(), conn.clone());
        (conn, rx)
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.remove(id).map(|(_, conn)| conn)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Point-in-time copy of the members, so callers never hold shard
    /// locks while sending.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// Remove and return every member.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }
}
