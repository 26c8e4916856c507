//! Relay engine: join, leave, publish and disconnect against shared state.

use crate::collaborator::{
    AllowAll, Authorizer, ClaimedIdentity, IdentityProvider, PersistenceQueue,
    DEFAULT_PERSISTENCE_CAPACITY,
};
use crate::connection::{Connection, ConnectionId, OutboundReceiver};
use crate::envelope::{MessageEnvelope, MessagePayload};
use crate::error::RelayError;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::{ConnectionRegistry, DEFAULT_QUEUE_CAPACITY};
use crate::room::{RoomDirectory, MAX_ROOMS_PER_CONNECTION};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default limit on concurrent connections.
pub const MAX_CONNECTIONS: usize = 10000;

/// Tunables for the relay core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Capacity of each connection's outbound queue.
    pub queue_capacity: usize,
    /// Maximum number of concurrent connections.
    pub max_connections: usize,
    /// Maximum rooms a single connection may join.
    pub max_rooms_per_connection: usize,
    /// Capacity of the persistence hand-off queue.
    pub persistence_queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_connections: MAX_CONNECTIONS,
            max_rooms_per_connection: MAX_ROOMS_PER_CONNECTION,
            persistence_queue_capacity: DEFAULT_PERSISTENCE_CAPACITY,
        }
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Sequence number assigned within the room.
    pub seq: u64,
    /// Members whose queue accepted the envelope.
    pub delivered: usize,
    /// Members whose queue was full or closed.
    pub dropped: usize,
}

/// Relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    /// Current number of connections.
    pub current_connections: usize,
    /// Current number of non-empty rooms.
    pub current_rooms: usize,
    /// Total connections since start.
    pub total_connections: u64,
    /// Total successful joins since start.
    pub total_joins: u64,
    /// Total messages fanned out since start.
    pub total_messages: u64,
    /// Total envelopes accepted by member queues.
    pub total_deliveries: u64,
    /// Events dropped because a queue was full or closed.
    pub dropped_deliveries: u64,
    /// Client events answered with an error.
    pub rejected_events: u64,
    /// Envelopes the persistence queue could not accept.
    pub persistence_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicU64,
    joins: AtomicU64,
    messages: AtomicU64,
    deliveries: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    persistence_dropped: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Orchestrates the connection registry and room directory.
pub struct RelayEngine {
    config: RelayConfig,
    registry: ConnectionRegistry,
    rooms: RoomDirectory,
    authorizer: Arc<dyn Authorizer>,
    identity: Arc<dyn IdentityProvider>,
    persistence: Option<PersistenceQueue>,
    counters: Counters,
}

impl RelayEngine {
    /// Create an engine that admits every join and trusts claimed identities.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(config.queue_capacity),
            rooms: RoomDirectory::new(config.max_rooms_per_connection),
            config,
            authorizer: Arc::new(AllowAll),
            identity: Arc::new(ClaimedIdentity),
            persistence: None,
            counters: Counters::default(),
        }
    }

    /// Set the membership authorizer consulted before every join.
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Set the identity provider used to fill in message authors.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    /// Forward every fanned-out envelope to a persistence queue.
    pub fn with_persistence(mut self, queue: PersistenceQueue) -> Self {
        self.persistence = Some(queue);
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Register a new connection without checking the connection limit.
    pub fn connect(&self, user_id: Option<String>) -> (Arc<Connection>, OutboundReceiver) {
        let (connection, receiver) = self.registry.register(user_id);
        self.registered(&connection);
        (connection, receiver)
    }

    /// Register a new connection, failing with `AtCapacity` once
    /// `max_connections` are live.
    pub fn try_connect(
        &self,
        user_id: Option<String>,
    ) -> Result<(Arc<Connection>, OutboundReceiver), RelayError> {
        let (connection, receiver) = self
            .registry
            .try_register(user_id, self.config.max_connections)?;
        self.registered(&connection);
        Ok((connection, receiver))
    }

    fn registered(&self, connection: &Connection) {
        Counters::add(&self.counters.connections, 1);
        info!(
            connection_id = %connection.id,
            user_id = connection.user_id.as_deref().unwrap_or("-"),
            "Connection registered"
        );
    }

    /// Whether the connection limit has been reached.
    ///
    /// Advisory only; `try_connect` is the authoritative check.
    pub fn at_capacity(&self) -> bool {
        self.registry.len() >= self.config.max_connections
    }

    /// Add a connection to a room after authorization.
    ///
    /// The `joined` acknowledgement is queued to the connection as part of
    /// the join.
    pub fn handle_join(&self, connection_id: &str, room_id: &str) -> Result<(), RelayError> {
        validate_room(room_id)?;
        let connection = self
            .registry
            .get(connection_id)
            .ok_or_else(|| RelayError::ConnectionNotFound(connection_id.to_string()))?;

        if !self
            .authorizer
            .authorize(connection.user_id.as_deref(), room_id)
        {
            warn!(connection_id = %connection_id, room_id = %room_id, "Join rejected");
            return Err(RelayError::Unauthorized(room_id.to_string()));
        }

        let outcome = self.rooms.join(room_id, &connection)?;
        if outcome.newly_joined {
            Counters::add(&self.counters.joins, 1);
            debug!(connection_id = %connection_id, room_id = %room_id, "Joined room");
        }
        if !outcome.acknowledged {
            Counters::add(&self.counters.dropped, 1);
            debug!(connection_id = %connection_id, room_id = %room_id, "Join acknowledgement dropped");
        }
        Ok(())
    }

    /// Remove a connection from a room. Always succeeds.
    pub fn handle_leave(&self, connection_id: &str, room_id: &str) {
        if let Some(connection) = self.registry.get(connection_id) {
            if self.rooms.leave(room_id, &connection) {
                debug!(connection_id = %connection_id, room_id = %room_id, "Left room");
            }
        }
    }

    /// Fan a message out to every member of a room, including the sender.
    pub fn handle_publish(
        &self,
        connection_id: &str,
        room_id: &str,
        payload: MessagePayload,
    ) -> Result<PublishReceipt, RelayError> {
        validate_room(room_id)?;
        if payload.is_empty() {
            return Err(RelayError::EmptyPayload);
        }
        let connection = self
            .registry
            .get(connection_id)
            .ok_or_else(|| RelayError::NotAMember(room_id.to_string()))?;

        let author = self
            .identity
            .author(connection.user_id.as_deref(), &payload.author);
        let fan_out = self.rooms.publish(room_id, &connection.id, |seq| {
            MessageEnvelope::new(
                room_id.to_string(),
                connection.id.clone(),
                seq,
                author,
                payload,
            )
        })?;

        Counters::add(&self.counters.messages, 1);
        Counters::add(&self.counters.deliveries, fan_out.delivered as u64);
        if !fan_out.dropped.is_empty() {
            Counters::add(&self.counters.dropped, fan_out.dropped.len() as u64);
            warn!(
                room_id = %room_id,
                seq = fan_out.envelope.seq,
                dropped = ?fan_out.dropped,
                "Delivery dropped for slow or closed connections"
            );
        }

        if let Some(queue) = &self.persistence {
            if !queue.submit(Arc::clone(&fan_out.envelope)) {
                Counters::add(&self.counters.persistence_dropped, 1);
                warn!(room_id = %room_id, seq = fan_out.envelope.seq, "Persistence queue full");
            }
        }

        debug!(
            connection_id = %connection_id,
            room_id = %room_id,
            seq = fan_out.envelope.seq,
            recipients = fan_out.delivered,
            "Message fanned out"
        );

        Ok(PublishReceipt {
            seq: fan_out.envelope.seq,
            delivered: fan_out.delivered,
            dropped: fan_out.dropped.len(),
        })
    }

    /// Tear a connection down, leaving every room first. Idempotent.
    pub fn handle_disconnect(&self, connection_id: &str) -> bool {
        let removed = self.registry.unregister(connection_id, &self.rooms);
        if removed {
            info!(connection_id = %connection_id, "Connection unregistered");
        }
        removed
    }

    /// Dispatch a decoded client event and return the reply for its sender.
    ///
    /// Successful joins and publishes produce no reply: the join queues its
    /// own acknowledgement and the sender receives the authoritative echo
    /// through its outbound queue.
    pub fn handle_event(&self, connection_id: &str, event: ClientEvent) -> Option<ServerEvent> {
        let result = match event {
            ClientEvent::JoinChannel { room_id } => {
                self.handle_join(connection_id, &room_id).map(|_| None)
            }
            ClientEvent::LeaveChannel { room_id } => validate_room(&room_id).map(|_| {
                self.handle_leave(connection_id, &room_id);
                Some(ServerEvent::Left { room_id })
            }),
            ClientEvent::SendMessage(message) => {
                let (room_id, payload) = message.into_parts();
                self.handle_publish(connection_id, &room_id, payload)
                    .map(|_| None)
            }
            ClientEvent::Ping => Ok(Some(ServerEvent::Pong)),
        };

        result.unwrap_or_else(|e| Some(self.rejection(connection_id, &e)))
    }

    /// Count a rejected event and build the error reply for it.
    pub fn rejection(&self, connection_id: &str, err: &RelayError) -> ServerEvent {
        Counters::add(&self.counters.rejected, 1);
        debug!(connection_id = %connection_id, code = err.code(), error = %err, "Event rejected");
        ServerEvent::error(err)
    }

    /// Queue an event for one connection, counting it if dropped.
    pub fn enqueue(&self, connection_id: &str, event: ServerEvent) {
        if let Err(e) = self.registry.enqueue(connection_id, event) {
            Counters::add(&self.counters.dropped, 1);
            debug!(connection_id = %connection_id, error = %e, "Reply dropped");
        }
    }

    /// Snapshot of a room's members.
    pub fn members(&self, room_id: &str) -> HashSet<ConnectionId> {
        self.rooms.members(room_id)
    }

    /// Look up a live connection.
    pub fn connection(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.registry.get(connection_id)
    }

    /// Current connection count.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Current number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.room_count()
    }

    /// Get relay statistics.
    pub fn stats(&self) -> RelayStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        RelayStats {
            current_connections: self.connection_count(),
            current_rooms: self.room_count(),
            total_connections: load(&self.counters.connections),
            total_joins: load(&self.counters.joins),
            total_messages: load(&self.counters.messages),
            total_deliveries: load(&self.counters.deliveries),
            dropped_deliveries: load(&self.counters.dropped),
            rejected_events: load(&self.counters.rejected),
            persistence_dropped: load(&self.counters.persistence_dropped),
        }
    }
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

impl std::fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayEngine")
            .field("config", &self.config)
            .field("connections", &self.registry.len())
            .field("rooms", &self.rooms.room_count())
            .field("persistence", &self.persistence.is_some())
            .finish()
    }
}

fn validate_room(room_id: &str) -> Result<(), RelayError> {
    if room_id.trim().is_empty() {
        return Err(RelayError::MalformedEvent(
            "roomId must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::RoomAllowList;
    use crate::protocol::SendMessage;

    fn drain(rx: &mut OutboundReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn contents(events: &[ServerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                ServerEvent::ReceiveMessage(env) => Some(env.content.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_join_rejects_empty_room() {
        let engine = RelayEngine::default();
        let (conn, _rx) = engine.connect(None);

        let err = engine.handle_join(&conn.id, "  ").unwrap_err();
        assert!(matches!(err, RelayError::MalformedEvent(_)));
    }

    #[test]
    fn test_join_unauthorized() {
        let engine = RelayEngine::default()
            .with_authorizer(Arc::new(RoomAllowList::new().restrict("staff", ["alice"])));
        let (bob, _rx_b) = engine.connect(Some("bob".into()));
        let (alice, _rx_a) = engine.connect(Some("alice".into()));

        let err = engine.handle_join(&bob.id, "staff").unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized(room) if room == "staff"));
        assert!(engine.members("staff").is_empty());
        assert_eq!(bob.room_count(), 0);

        engine.handle_join(&alice.id, "staff").unwrap();
        assert!(engine.members("staff").contains(&alice.id));
    }

    #[test]
    fn test_publish_echoes_to_sender() {
        let engine = RelayEngine::default();
        let (a, mut rx_a) = engine.connect(None);
        let (b, mut rx_b) = engine.connect(None);
        engine.handle_join(&a.id, "general").unwrap();
        engine.handle_join(&b.id, "general").unwrap();

        let receipt = engine
            .handle_publish(&a.id, "general", MessagePayload::text("hi"))
            .unwrap();
        assert_eq!(receipt.seq, 1);
        assert_eq!(receipt.delivered, 2);

        assert_eq!(contents(&drain(&mut rx_a)), vec!["hi"]);
        assert_eq!(contents(&drain(&mut rx_b)), vec!["hi"]);
    }

    #[test]
    fn test_publish_empty_payload() {
        let engine = RelayEngine::default();
        let (a, _rx) = engine.connect(None);
        engine.handle_join(&a.id, "general").unwrap();

        let err = engine
            .handle_publish(&a.id, "general", MessagePayload::text(""))
            .unwrap_err();
        assert!(matches!(err, RelayError::EmptyPayload));
    }

    #[test]
    fn test_publish_not_a_member() {
        let engine = RelayEngine::default();
        let (a, _rx_a) = engine.connect(None);
        let (b, mut rx_b) = engine.connect(None);
        engine.handle_join(&b.id, "general").unwrap();

        let err = engine
            .handle_publish(&a.id, "general", MessagePayload::text("spoof"))
            .unwrap_err();
        assert!(matches!(err, RelayError::NotAMember(_)));
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_author_from_identity_provider() {
        let engine = RelayEngine::default();
        let (a, mut rx) = engine.connect(Some("u1".into()));
        engine.handle_join(&a.id, "general").unwrap();

        let payload = MessagePayload {
            content: "hi".into(),
            author: crate::envelope::AuthorClaim {
                id: Some("spoofed".into()),
                display_name: Some("Ada".into()),
                avatar: None,
            },
            ..MessagePayload::default()
        };
        engine.handle_publish(&a.id, "general", payload).unwrap();

        match drain(&mut rx).pop() {
            Some(ServerEvent::ReceiveMessage(env)) => {
                assert_eq!(env.author.id, "u1");
                assert_eq!(env.author.name, "Ada");
                assert_eq!(env.sender, a.id);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_handle_event_replies() {
        let engine = RelayEngine::default();
        let (a, mut rx) = engine.connect(None);

        let reply = engine.handle_event(
            &a.id,
            ClientEvent::JoinChannel {
                room_id: "general".into(),
            },
        );
        assert!(reply.is_none());

        let reply = engine.handle_event(
            &a.id,
            ClientEvent::SendMessage(SendMessage {
                room_id: "general".into(),
                content: "hi".into(),
                ..SendMessage::default()
            }),
        );
        assert!(reply.is_none());

        let events = drain(&mut rx);
        assert!(matches!(&events[0], ServerEvent::Joined { room_id } if room_id == "general"));
        assert_eq!(contents(&events), vec!["hi"]);

        let reply = engine.handle_event(
            &a.id,
            ClientEvent::LeaveChannel {
                room_id: "general".into(),
            },
        );
        assert!(matches!(reply, Some(ServerEvent::Left { .. })));

        let reply = engine.handle_event(&a.id, ClientEvent::Ping);
        assert!(matches!(reply, Some(ServerEvent::Pong)));
    }

    #[test]
    fn test_handle_event_error_reply() {
        let engine = RelayEngine::default();
        let (a, _rx) = engine.connect(None);

        let reply = engine.handle_event(
            &a.id,
            ClientEvent::SendMessage(SendMessage {
                room_id: "general".into(),
                content: "hi".into(),
                ..SendMessage::default()
            }),
        );
        match reply {
            Some(ServerEvent::Error { code, .. }) => assert_eq!(code, "not_a_member"),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(engine.stats().rejected_events, 1);
    }

    #[test]
    fn test_disconnect_cascades() {
        let engine = RelayEngine::default();
        let (a, _rx_a) = engine.connect(None);
        let (b, _rx_b) = engine.connect(None);
        engine.handle_join(&a.id, "general").unwrap();
        engine.handle_join(&a.id, "random").unwrap();
        engine.handle_join(&b.id, "general").unwrap();

        assert!(engine.handle_disconnect(&a.id));
        assert!(!engine.handle_disconnect(&a.id));

        assert_eq!(engine.members("general").len(), 1);
        assert!(engine.members("random").is_empty());
        assert_eq!(engine.connection_count(), 1);
        assert!(matches!(
            engine.handle_join(&a.id, "general"),
            Err(RelayError::ConnectionNotFound(_))
        ));
    }

    #[test]
    fn test_stats() {
        let engine = RelayEngine::default();
        let (a, _rx_a) = engine.connect(None);
        let (b, rx_b) = engine.connect(None);
        engine.handle_join(&a.id, "general").unwrap();
        engine.handle_join(&b.id, "general").unwrap();
        drop(rx_b);

        engine
            .handle_publish(&a.id, "general", MessagePayload::text("hi"))
            .unwrap();

        let stats = engine.stats();
        assert_eq!(stats.current_connections, 2);
        assert_eq!(stats.current_rooms, 1);
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.total_joins, 2);
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.total_deliveries, 1);
        assert_eq!(stats.dropped_deliveries, 1);
    }

    #[test]
    fn test_at_capacity() {
        let engine = RelayEngine::new(RelayConfig {
            max_connections: 1,
            ..RelayConfig::default()
        });
        assert!(!engine.at_capacity());
        let (_a, _rx) = engine.connect(None);
        assert!(engine.at_capacity());
    }

    #[test]
    fn test_try_connect_refuses_over_limit() {
        let engine = RelayEngine::new(RelayConfig {
            max_connections: 2,
            ..RelayConfig::default()
        });
        let (a, _rx_a) = engine.try_connect(None).unwrap();
        let (_b, _rx_b) = engine.try_connect(None).unwrap();

        let err = engine.try_connect(None).unwrap_err();
        assert_eq!(err.code(), "at_capacity");
        assert_eq!(engine.stats().total_connections, 2);

        engine.handle_disconnect(&a.id);
        assert!(engine.try_connect(None).is_ok());
    }

    struct ChannelStore(tokio::sync::mpsc::UnboundedSender<u64>);

    #[async_trait::async_trait]
    impl crate::collaborator::MessageStore for ChannelStore {
        async fn persist(&self, envelope: &MessageEnvelope) -> Result<(), RelayError> {
            let _ = self.0.send(envelope.seq);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_hands_off_to_persistence() {
        let (tx, mut seen) = tokio::sync::mpsc::unbounded_channel();
        let (queue, _worker) = PersistenceQueue::spawn(Arc::new(ChannelStore(tx)), 8);
        let engine = RelayEngine::default().with_persistence(queue);
        let (a, _rx) = engine.connect(None);
        engine.handle_join(&a.id, "general").unwrap();

        for _ in 0..3 {
            engine
                .handle_publish(&a.id, "general", MessagePayload::text("hi"))
                .unwrap();
        }

        for expected in 1..=3 {
            assert_eq!(seen.recv().await, Some(expected));
        }
        assert_eq!(engine.stats().persistence_dropped, 0);
    }
}
