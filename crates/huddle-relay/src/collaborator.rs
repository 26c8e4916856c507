//! Seams to the services the relay consumes but does not implement:
//! membership authorization, identity, and message persistence.

use crate::envelope::{Author, AuthorClaim, MessageEnvelope};
use crate::error::RelayError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Decides whether a user may join a room.
pub trait Authorizer: Send + Sync {
    /// Called synchronously before a join is applied.
    fn authorize(&self, user_id: Option<&str>, room_id: &str) -> bool;
}

/// Admits every join.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _user_id: Option<&str>, _room_id: &str) -> bool {
        true
    }
}

/// Restricts listed rooms to listed users; unlisted rooms stay open.
#[derive(Debug, Clone, Default)]
pub struct RoomAllowList {
    rooms: HashMap<String, HashSet<String>>,
}

impl RoomAllowList {
    /// Create an empty allow list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict a room to the given users.
    pub fn restrict<I, S>(mut self, room_id: impl Into<String>, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rooms
            .entry(room_id.into())
            .or_default()
            .extend(users.into_iter().map(Into::into));
        self
    }
}

impl From<HashMap<String, Vec<String>>> for RoomAllowList {
    fn from(rooms: HashMap<String, Vec<String>>) -> Self {
        rooms
            .into_iter()
            .fold(Self::new(), |list, (room, users)| list.restrict(room, users))
    }
}

impl Authorizer for RoomAllowList {
    fn authorize(&self, user_id: Option<&str>, room_id: &str) -> bool {
        match self.rooms.get(room_id) {
            None => true,
            Some(allowed) => user_id.is_some_and(|user| allowed.contains(user)),
        }
    }
}

/// Supplies author metadata for published messages.
pub trait IdentityProvider: Send + Sync {
    /// Resolve the author of a message sent by `user_id`.
    fn author(&self, user_id: Option<&str>, claim: &AuthorClaim) -> Author;
}

/// Trusts the client-supplied sender fields, except that an authenticated
/// user id always wins over the claimed one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimedIdentity;

impl IdentityProvider for ClaimedIdentity {
    fn author(&self, user_id: Option<&str>, claim: &AuthorClaim) -> Author {
        let id = user_id
            .map(str::to_string)
            .or_else(|| claim.id.clone())
            .unwrap_or_else(|| "anonymous".to_string());
        let name = claim
            .display_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| id.clone());
        Author {
            id,
            name,
            avatar: claim.avatar.clone(),
        }
    }
}

/// Durable storage for relayed messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store one envelope.
    async fn persist(&self, envelope: &MessageEnvelope) -> Result<(), RelayError>;
}

/// Default capacity of the persistence queue.
pub const DEFAULT_PERSISTENCE_CAPACITY: usize = 1024;

/// Fire-and-forget hand-off of envelopes to a [`MessageStore`].
#[derive(Debug, Clone)]
pub struct PersistenceQueue {
    sender: mpsc::Sender<Arc<MessageEnvelope>>,
}

impl PersistenceQueue {
    /// Start a worker task that drains the queue into `store`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<dyn MessageStore>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Arc<MessageEnvelope>>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                if let Err(e) = store.persist(&envelope).await {
                    warn!(
                        room_id = %envelope.room_id,
                        seq = envelope.seq,
                        error = %e,
                        "Failed to persist message"
                    );
                }
            }
            debug!("Persistence worker stopped");
        });
        (Self { sender }, worker)
    }

    /// Queue an envelope. Returns `false` if the queue was full or closed.
    pub fn submit(&self, envelope: Arc<MessageEnvelope>) -> bool {
        self.sender.try_send(envelope).is_ok()
    }
}
