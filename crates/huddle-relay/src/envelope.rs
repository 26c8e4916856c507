//! Message envelopes fanned out to room members.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionId;
use crate::room::RoomId;

/// Author metadata shown next to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Stable user identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Avatar URL, if any.
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Sender details as claimed by the client in `send_message`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorClaim {
    /// Claimed user id.
    pub id: Option<String>,
    /// Claimed display name.
    pub display_name: Option<String>,
    /// Claimed avatar URL.
    pub avatar: Option<String>,
}

/// The opaque part of a publish request.
#[derive(Debug, Clone, Default)]
pub struct MessagePayload {
    /// Message text.
    pub content: String,
    /// Who the client says sent it.
    pub author: AuthorClaim,
    /// Human-readable timestamp supplied by the client.
    pub client_timestamp: Option<String>,
    /// Temporary id the client assigned for optimistic rendering.
    pub client_id: Option<String>,
}

impl MessagePayload {
    /// Create a payload carrying only content.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Whether the payload has nothing worth relaying.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// The unit delivered to every member of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Client temp id when supplied, otherwise relay-assigned.
    pub id: String,
    /// Room the message was published to.
    pub room_id: RoomId,
    /// Message text.
    pub content: String,
    /// Author metadata.
    pub author: Author,
    /// Human-readable timestamp.
    pub timestamp: String,
    /// Per-room sequence number, starting at 1.
    pub seq: u64,
    /// Connection that published the message.
    pub sender: ConnectionId,
    /// Unix milliseconds when the relay accepted the message.
    pub received_at: i64,
}

impl MessageEnvelope {
    /// Build an envelope from a validated payload.
    pub fn new(
        room_id: RoomId,
        sender: ConnectionId,
        seq: u64,
        author: Author,
        payload: MessagePayload,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: payload
                .client_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            room_id,
            content: payload.content,
            author,
            timestamp: payload
                .client_timestamp
                .filter(|ts| !ts.is_empty())
                .unwrap_or_else(|| now.to_rfc3339_opts(SecondsFormat::Secs, true)),
            seq,
            sender,
            received_at: now.timestamp_millis(),
        }
    }
}
