//! The set of live connections.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use parlor_core::ConnectionId;
use tracing::{debug, error};

use crate::connection::ClientConnection;
use crate::error::HubError;

/// Thread-safe registry of open connections.
///
/// Every operation takes the lock briefly and never awaits, so membership
/// changes cannot stall on network I/O. Fan-out iterates a [`snapshot`],
/// never the live map.
///
/// [`snapshot`]: ConnectionRegistry::snapshot
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. A duplicate id leaves the existing entry in place.
    pub fn add(&self, connection: Arc<ClientConnection>) -> Result<(), HubError> {
        let mut conns = self.connections.write();
        if conns.contains_key(connection.id()) {
            error!(conn_id = %connection.id(), "connection registered twice");
            return Err(HubError::DuplicateConnection(connection.id().clone()));
        }
        let id = connection.id().clone();
        let _ = conns.insert(id.clone(), connection);
        debug!(conn_id = %id, members = conns.len(), "connection registered");
        Ok(())
    }

    /// Deregister a connection. Removing an absent id is a no-op.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let removed = self.connections.write().remove(id);
        if removed.is_some() {
            debug!(conn_id = %id, "connection deregistered");
        }
        removed
    }

    /// Point-in-time copy of the live connections.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}
