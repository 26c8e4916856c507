//! Room directory: which connections are listening to which channel.
//!
//! Each room sits behind its own mutex so traffic in unrelated rooms never
//! contends. The outer map lock is only held to look up, create or prune a
//! room.
//!
//! Lock order is room, then connection membership. Pruning takes the map
//! write lock before the room lock, so nothing may hold a room lock while
//! reaching for the map.

use crate::connection::{Connection, ConnectionId};
use crate::envelope::MessageEnvelope;
use crate::error::RelayError;
use crate::protocol::ServerEvent;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Room identifier (the external channel id).
pub type RoomId = String;

/// Maximum rooms a single connection may join by default.
pub const MAX_ROOMS_PER_CONNECTION: usize = 100;

/// One channel's live audience.
#[derive(Debug, Default)]
struct Room {
    members: HashMap<ConnectionId, Arc<Connection>>,
    last_seq: u64,
    /// Set once the room has been unlinked from the directory.
    retired: bool,
}

/// Result of fanning one envelope out to a room.
#[derive(Debug, Clone)]
pub struct FanOut {
    /// The envelope that was delivered.
    pub envelope: Arc<MessageEnvelope>,
    /// Number of members whose queue accepted the envelope.
    pub delivered: usize,
    /// Members whose queue was full or closed.
    pub dropped: Vec<ConnectionId>,
}

/// Result of a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The connection was not a member before.
    pub newly_joined: bool,
    /// The `joined` acknowledgement was accepted by the outbound queue.
    pub acknowledged: bool,
}

/// Maps room identifiers to their member connections.
#[derive(Debug)]
pub struct RoomDirectory {
    rooms: RwLock<HashMap<RoomId, Arc<Mutex<Room>>>>,
    max_rooms_per_connection: usize,
}

impl RoomDirectory {
    /// Create an empty directory.
    pub fn new(max_rooms_per_connection: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_rooms_per_connection,
        }
    }

    fn room(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().get(room_id).cloned()
    }

    fn room_or_create(&self, room_id: &str) -> Arc<Mutex<Room>> {
        if let Some(room) = self.room(room_id) {
            return room;
        }
        self.rooms
            .write()
            .entry(room_id.to_string())
            .or_default()
            .clone()
    }

    /// Add a connection to a room, creating the room if needed.
    ///
    /// The `joined` acknowledgement is queued before the room lock is
    /// released, so no envelope from this room can reach the connection
    /// ahead of it.
    pub fn join(
        &self,
        room_id: &str,
        connection: &Arc<Connection>,
    ) -> Result<JoinOutcome, RelayError> {
        if connection.membership().closed {
            return Err(RelayError::ConnectionNotFound(connection.id.clone()));
        }

        loop {
            let room = self.room_or_create(room_id);
            let mut room = room.lock();
            if room.retired {
                // Lost a race with pruning; the next lookup creates a fresh room.
                continue;
            }

            let mut membership = connection.membership();
            let outcome = if membership.closed {
                Err(RelayError::ConnectionNotFound(connection.id.clone()))
            } else if membership.rooms.contains(room_id) {
                Ok(false)
            } else if membership.rooms.len() >= self.max_rooms_per_connection {
                Err(RelayError::RoomLimit(self.max_rooms_per_connection))
            } else {
                membership.rooms.insert(room_id.to_string());
                room.members
                    .insert(connection.id.clone(), Arc::clone(connection));
                Ok(true)
            };
            drop(membership);

            let outcome = outcome.map(|newly_joined| JoinOutcome {
                newly_joined,
                acknowledged: connection
                    .try_send(ServerEvent::Joined {
                        room_id: room_id.to_string(),
                    })
                    .is_ok(),
            });

            let empty = room.members.is_empty();
            drop(room);
            if empty {
                self.prune(room_id);
            }
            return outcome;
        }
    }

    /// Remove a connection from a room. Returns `true` if it was a member.
    pub fn leave(&self, room_id: &str, connection: &Connection) -> bool {
        let Some(room) = self.room(room_id) else {
            connection.membership().rooms.remove(room_id);
            return false;
        };

        let (removed, empty) = {
            let mut room = room.lock();
            let mut membership = connection.membership();
            membership.rooms.remove(room_id);
            let removed = room.members.remove(&connection.id).is_some();
            (removed, room.members.is_empty())
        };

        if empty {
            self.prune(room_id);
        }
        removed
    }

    fn prune(&self, room_id: &str) {
        let mut rooms = self.rooms.write();
        let Some(room) = rooms.get(room_id).cloned() else {
            return;
        };
        let mut room = room.lock();
        if room.members.is_empty() && !room.retired {
            room.retired = true;
            rooms.remove(room_id);
        }
    }

    /// Point-in-time snapshot of a room's members.
    pub fn members(&self, room_id: &str) -> HashSet<ConnectionId> {
        match self.room(room_id) {
            Some(room) => room.lock().members.keys().cloned().collect(),
            None => HashSet::new(),
        }
    }

    /// Whether the connection is currently in the room.
    pub fn is_member(&self, room_id: &str, connection_id: &str) -> bool {
        self.room(room_id)
            .map(|room| room.lock().members.contains_key(connection_id))
            .unwrap_or(false)
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    /// Validate membership, assign the next sequence number and enqueue the
    /// envelope to every member, all inside the room's critical section.
    pub fn publish<F>(
        &self,
        room_id: &str,
        sender: &str,
        build: F,
    ) -> Result<FanOut, RelayError>
    where
        F: FnOnce(u64) -> MessageEnvelope,
    {
        let room = self
            .room(room_id)
            .ok_or_else(|| RelayError::NotAMember(room_id.to_string()))?;
        let mut room = room.lock();
        if room.retired || !room.members.contains_key(sender) {
            return Err(RelayError::NotAMember(room_id.to_string()));
        }

        room.last_seq += 1;
        let envelope = Arc::new(build(room.last_seq));

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (id, member) in &room.members {
            match member.try_send(ServerEvent::ReceiveMessage(Arc::clone(&envelope))) {
                Ok(()) => delivered += 1,
                Err(_) => dropped.push(id.clone()),
            }
        }

        Ok(FanOut {
            envelope,
            delivered,
            dropped,
        })
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new(MAX_ROOMS_PER_CONNECTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Author, MessagePayload};

    fn conn(id: &str) -> (Arc<Connection>, crate::connection::OutboundReceiver) {
        Connection::new(id.to_string(), None, 16)
    }

    fn envelope(room: &str, sender: &str, seq: u64) -> MessageEnvelope {
        MessageEnvelope::new(
            room.to_string(),
            sender.to_string(),
            seq,
            Author {
                id: sender.to_string(),
                name: sender.to_string(),
                avatar: None,
            },
            MessagePayload::text("hi"),
        )
    }

    #[test]
    fn test_join_is_idempotent() {
        let dir = RoomDirectory::default();
        let (a, _rx) = conn("a");

        assert!(dir.join("general", &a).unwrap().newly_joined);
        assert!(!dir.join("general", &a).unwrap().newly_joined);
        assert_eq!(dir.members("general").len(), 1);
        assert!(a.is_member("general"));
    }

    #[test]
    fn test_join_acknowledges_every_join() {
        let dir = RoomDirectory::default();
        let (a, mut rx) = conn("a");

        let outcome = dir.join("general", &a).unwrap();
        assert_eq!(
            outcome,
            JoinOutcome {
                newly_joined: true,
                acknowledged: true
            }
        );
        dir.join("general", &a).unwrap();

        for _ in 0..2 {
            match rx.try_recv().unwrap() {
                ServerEvent::Joined { room_id } => assert_eq!(room_id, "general"),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_join_reports_dropped_acknowledgement() {
        let dir = RoomDirectory::default();
        let (a, rx) = conn("a");
        drop(rx);

        let outcome = dir.join("general", &a).unwrap();
        assert!(outcome.newly_joined);
        assert!(!outcome.acknowledged);
        assert!(dir.is_member("general", "a"));
    }

    #[test]
    fn test_leave_is_idempotent_and_prunes() {
        let dir = RoomDirectory::default();
        let (a, _rx) = conn("a");

        dir.join("general", &a).unwrap();
        assert!(dir.leave("general", &a));
        assert!(!dir.leave("general", &a));

        assert!(!a.is_member("general"));
        assert!(dir.members("general").is_empty());
        assert_eq!(dir.room_count(), 0);
    }

    #[test]
    fn test_pruned_room_behaves_like_new() {
        let dir = RoomDirectory::default();
        let (a, _rx) = conn("a");

        dir.join("general", &a).unwrap();
        dir.leave("general", &a);

        assert!(!dir.is_member("general", "a"));
        assert!(matches!(
            dir.publish("general", "a", |seq| envelope("general", "a", seq)),
            Err(RelayError::NotAMember(_))
        ));

        dir.join("general", &a).unwrap();
        assert_eq!(dir.members("general").len(), 1);
    }

    #[test]
    fn test_join_closed_connection_fails() {
        let dir = RoomDirectory::default();
        let (a, _rx) = conn("a");
        a.close();

        assert!(matches!(
            dir.join("general", &a),
            Err(RelayError::ConnectionNotFound(_))
        ));
        assert_eq!(dir.room_count(), 0);
    }

    #[test]
    fn test_room_limit() {
        let dir = RoomDirectory::new(2);
        let (a, _rx) = conn("a");

        dir.join("one", &a).unwrap();
        dir.join("two", &a).unwrap();
        assert!(matches!(dir.join("three", &a), Err(RelayError::RoomLimit(2))));

        // Rejoining an existing room is still fine
        assert!(!dir.join("one", &a).unwrap().newly_joined);
        assert_eq!(dir.room_count(), 2);
    }

    #[test]
    fn test_publish_assigns_sequence() {
        let dir = RoomDirectory::default();
        let (a, mut rx) = conn("a");
        dir.join("general", &a).unwrap();

        let first = dir
            .publish("general", "a", |seq| envelope("general", "a", seq))
            .unwrap();
        let second = dir
            .publish("general", "a", |seq| envelope("general", "a", seq))
            .unwrap();

        assert_eq!(first.envelope.seq, 1);
        assert_eq!(second.envelope.seq, 2);
        assert_eq!(first.delivered, 1);

        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Joined { .. }));
        for expected in 1..=2 {
            match rx.try_recv().unwrap() {
                ServerEvent::ReceiveMessage(env) => assert_eq!(env.seq, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_publish_counts_dropped_members() {
        let dir = RoomDirectory::default();
        let (a, _rx_a) = conn("a");
        let (b, rx_b) = conn("b");
        dir.join("general", &a).unwrap();
        dir.join("general", &b).unwrap();
        drop(rx_b);

        let fan_out = dir
            .publish("general", "a", |seq| envelope("general", "a", seq))
            .unwrap();
        assert_eq!(fan_out.delivered, 1);
        assert_eq!(fan_out.dropped, vec!["b".to_string()]);
    }

    #[test]
    fn test_publish_rejects_non_member() {
        let dir = RoomDirectory::default();
        let (a, _rx_a) = conn("a");
        let (_b, _rx_b) = conn("b");
        dir.join("general", &a).unwrap();

        let err = dir
            .publish("general", "b", |seq| envelope("general", "b", seq))
            .unwrap_err();
        assert!(matches!(err, RelayError::NotAMember(room) if room == "general"));
    }
}
