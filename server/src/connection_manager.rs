//! Registry of live connections.
//!
//! The socket frontend registers connections on accept and removes them when
//! their socket ends; the tick scheduler snapshots the registry each tick and
//! removes the connections it reclaims. Snapshots are taken in accept order,
//! so removal while a tick is running never skips or repeats a connection.

use log::info;
use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::connection::{Connection, ConnectionWriter, SharedConnection};

/// Bounded set of live connections.
pub struct ConnectionManager {
    /// Live connections keyed by id, ids increase with accept order
    connections: BTreeMap<u32, SharedConnection>,
    next_connection_id: u32,
    max_connections: usize,
}

impl ConnectionManager {
    /// Creates an empty registry that holds at most `max_connections`.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            next_connection_id: 1,
            max_connections,
        }
    }

    fn reserve_id(&mut self) -> Option<u32> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        let id = self.next_connection_id;
        self.next_connection_id += 1;
        Some(id)
    }

    /// Creates and registers a connection in the login phase.
    ///
    /// Returns `None` when the registry is at capacity.
    pub fn register(
        &mut self,
        addr: SocketAddr,
        tick: u64,
        writer: impl FnOnce(u32) -> ConnectionWriter,
    ) -> Option<SharedConnection> {
        let id = self.reserve_id()?;
        let connection = Connection::new(id, addr, tick, writer(id)).into_shared();
        info!("Connection {} accepted from {}", id, addr);
        self.connections.insert(id, connection.clone());
        Some(connection)
    }

    /// Removes a connection. Returns false if it was already gone.
    pub fn remove(&mut self, id: u32) -> bool {
        if self.connections.remove(&id).is_some() {
            info!("Connection {} removed", id);
            true
        } else {
            false
        }
    }

    /// Looks up a live connection by id.
    pub fn get(&self, id: u32) -> Option<SharedConnection> {
        self.connections.get(&id).cloned()
    }

    /// Every live connection in accept order.
    pub fn snapshot(&self) -> Vec<SharedConnection> {
        self.connections.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
