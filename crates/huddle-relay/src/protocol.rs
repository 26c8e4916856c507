//! Client/server event contract carried over the transport.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::envelope::{AuthorClaim, MessageEnvelope, MessagePayload};
use crate::error::RelayError;
use crate::room::RoomId;

/// Events that clients can send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Start receiving messages for a room.
    JoinChannel {
        #[serde(rename = "roomId", default)]
        room_id: RoomId,
    },
    /// Stop receiving messages for a room.
    LeaveChannel {
        #[serde(rename = "roomId", default)]
        room_id: RoomId,
    },
    /// Publish a message to a room.
    SendMessage(SendMessage),
    /// Ping for keepalive.
    Ping,
}

impl ClientEvent {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, RelayError> {
        serde_json::from_str(text).map_err(|e| RelayError::MalformedEvent(e.to_string()))
    }
}

/// Body of a `send_message` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Target room.
    #[serde(default)]
    pub room_id: RoomId,
    /// Message text.
    #[serde(default)]
    pub content: String,
    /// Claimed sender id.
    #[serde(default)]
    pub sender_id: Option<String>,
    /// Claimed sender display name.
    #[serde(default)]
    pub sender_display_name: Option<String>,
    /// Claimed sender avatar.
    #[serde(default)]
    pub sender_avatar: Option<String>,
    /// Client-side timestamp string.
    #[serde(default)]
    pub client_timestamp: Option<String>,
    /// Temporary client id.
    #[serde(default)]
    pub id: Option<String>,
}

impl SendMessage {
    /// Split into the target room and the opaque payload.
    pub fn into_parts(self) -> (RoomId, MessagePayload) {
        let payload = MessagePayload {
            content: self.content,
            author: AuthorClaim {
                id: self.sender_id,
                display_name: self.sender_display_name,
                avatar: self.sender_avatar,
            },
            client_timestamp: self.client_timestamp,
            client_id: self.id,
        };
        (self.room_id, payload)
    }
}

/// Events sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Join acknowledged.
    Joined {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    /// Leave acknowledged.
    Left {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    /// A message fanned out to the room.
    ReceiveMessage(Arc<MessageEnvelope>),
    /// Pong response to ping.
    Pong,
    /// Error contained to the receiving connection.
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Build an error event from a relay error.
    pub fn error(err: &RelayError) -> Self {
        ServerEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}
