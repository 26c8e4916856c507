//! Live client connections and their outbound queues.

use crate::error::RelayError;
use crate::protocol::ServerEvent;
use crate::room::RoomId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Unique identifier for a live connection.
pub type ConnectionId = String;

/// Handle for draining events the relay queued for one connection.
pub type OutboundReceiver = mpsc::Receiver<ServerEvent>;

/// One live client session on the relay.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// Authenticated user, when the transport supplied one.
    pub user_id: Option<String>,
    /// Unix timestamp of the accept.
    pub connected_at: u64,
    /// Bounded queue towards the delivery task.
    sender: mpsc::Sender<ServerEvent>,
    /// Rooms this connection belongs to.
    membership: Mutex<Membership>,
}

/// Connection-side half of the room membership mapping.
#[derive(Debug, Default)]
pub(crate) struct Membership {
    pub(crate) rooms: HashSet<RoomId>,
    pub(crate) closed: bool,
}

impl Connection {
    /// Create a connection with a bounded outbound queue.
    pub fn new(
        id: ConnectionId,
        user_id: Option<String>,
        queue_capacity: usize,
    ) -> (Arc<Self>, OutboundReceiver) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let connection = Arc::new(Self {
            id,
            user_id,
            connected_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            sender,
            membership: Mutex::new(Membership::default()),
        });
        (connection, receiver)
    }

    /// Queue an event without waiting. Full or closed queues drop the event.
    pub fn try_send(&self, event: ServerEvent) -> Result<(), RelayError> {
        self.sender
            .try_send(event)
            .map_err(|_| RelayError::DeliveryDropped(self.id.clone()))
    }

    /// Whether the delivery side has gone away.
    pub fn is_queue_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Check room membership.
    pub fn is_member(&self, room_id: &str) -> bool {
        self.membership.lock().rooms.contains(room_id)
    }

    /// Snapshot of the rooms this connection belongs to.
    pub fn rooms(&self) -> Vec<RoomId> {
        self.membership.lock().rooms.iter().cloned().collect()
    }

    /// Number of joined rooms.
    pub fn room_count(&self) -> usize {
        self.membership.lock().rooms.len()
    }

    /// Whether the connection has started tearing down.
    pub fn is_closed(&self) -> bool {
        self.membership.lock().closed
    }

    pub(crate) fn membership(&self) -> parking_lot::MutexGuard<'_, Membership> {
        self.membership.lock()
    }

    /// Mark closed and hand back the rooms that still need eviction.
    pub(crate) fn close(&self) -> Vec<RoomId> {
        let mut membership = self.membership.lock();
        membership.closed = true;
        membership.rooms.iter().cloned().collect()
    }
}
