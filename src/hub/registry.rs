use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::metrics::CONNECTIONS_ACTIVE;

use super::ConnectionHandle;

/// The authoritative set of connections currently eligible to receive
/// broadcasts.
///
/// All synchronization lives inside this type; callers only see the
/// add/remove/snapshot contract. Iteration uses snapshot-then-iterate
/// semantics: `snapshot` clones the current member handles, so a broadcast
/// round operates on the set as it existed at round start and connections
/// added mid-round wait for the next one.
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Insert a connection. Idempotent: re-adding an id that is already
    /// present replaces the entry and is not an error.
    pub fn add(&self, handle: Arc<ConnectionHandle>) {
        let id = handle.id;
        let peer = handle.peer;
        self.connections.insert(id, handle);
        CONNECTIONS_ACTIVE.set(self.connections.len() as i64);

        tracing::info!(connection_id = %id, peer = ?peer, "Connection registered");
    }

    /// Remove a connection if present, returning its handle. A failing
    /// reader and the fan-out loop may both try to remove the same entry;
    /// whichever loses the race finds nothing and that is a no-op, not an
    /// error.
    pub fn remove(&self, id: Uuid) -> Option<Arc<ConnectionHandle>> {
        let removed = self.connections.remove(&id).map(|(_, handle)| handle);
        if removed.is_some() {
            CONNECTIONS_ACTIVE.set(self.connections.len() as i64);
            tracing::info!(connection_id = %id, "Connection unregistered");
        }
        removed
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.connections.contains_key(&id)
    }

    /// Clone the current member set for iteration. Concurrent add/remove
    /// during the resulting iteration affect future snapshots only.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_connections: self.connections.len(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub active_connections: usize,
}
