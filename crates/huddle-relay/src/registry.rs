//! Connection registry.

use crate::connection::{Connection, ConnectionId, OutboundReceiver};
use crate::error::RelayError;
use crate::protocol::ServerEvent;
use crate::room::RoomDirectory;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Owns every live connection for its lifetime.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            queue_capacity,
        }
    }

    /// Register a new connection with an empty membership set.
    pub fn register(&self, user_id: Option<String>) -> (Arc<Connection>, OutboundReceiver) {
        let id = uuid::Uuid::new_v4().to_string();
        let (connection, receiver) = Connection::new(id.clone(), user_id, self.queue_capacity);
        self.connections.write().insert(id, Arc::clone(&connection));
        (connection, receiver)
    }

    /// Register a new connection unless `max_connections` are already live.
    ///
    /// The limit check and the insert happen under one write lock.
    pub fn try_register(
        &self,
        user_id: Option<String>,
        max_connections: usize,
    ) -> Result<(Arc<Connection>, OutboundReceiver), RelayError> {
        let mut connections = self.connections.write();
        if connections.len() >= max_connections {
            return Err(RelayError::AtCapacity(max_connections));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let (connection, receiver) = Connection::new(id.clone(), user_id, self.queue_capacity);
        connections.insert(id, Arc::clone(&connection));
        Ok((connection, receiver))
    }

    /// Evict a connection from every room, then forget it.
    ///
    /// Unknown ids are ignored. Returns `true` if a connection was removed.
    pub fn unregister(&self, connection_id: &str, rooms: &RoomDirectory) -> bool {
        let Some(connection) = self.get(connection_id) else {
            return false;
        };

        for room_id in connection.close() {
            rooms.leave(&room_id, &connection);
        }

        self.connections.write().remove(connection_id).is_some()
    }

    /// Queue an event for one connection without waiting.
    pub fn enqueue(&self, connection_id: &str, event: ServerEvent) -> Result<(), RelayError> {
        match self.get(connection_id) {
            Some(connection) => connection.try_send(event),
            None => Err(RelayError::DeliveryDropped(connection_id.to_string())),
        }
    }

    /// Look up a connection.
    pub fn get(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(connection_id).cloned()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connections are live.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
