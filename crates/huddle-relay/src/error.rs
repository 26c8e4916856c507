//! Error types for the relay core.

use thiserror::Error;

/// Errors that can occur while relaying chat events.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Inbound event is undecodable or missing required fields.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Publish carried no content.
    #[error("message payload is empty")]
    EmptyPayload,

    /// Publisher is not a member of the target room.
    #[error("connection is not a member of room {0}")]
    NotAMember(String),

    /// Join rejected by the authorization collaborator.
    #[error("not authorized to join room {0}")]
    Unauthorized(String),

    /// Outbound queue of a connection was full or closed.
    #[error("delivery to connection {0} dropped")]
    DeliveryDropped(String),

    /// Underlying transport failed.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Connection is unknown or already closing.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// Room limit for a single connection reached.
    #[error("room limit exceeded: max {0} rooms per connection")]
    RoomLimit(usize),

    /// Connection limit reached.
    #[error("relay at capacity: max {0} connections")]
    AtCapacity(usize),

    /// Persistence collaborator rejected an envelope.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Stable machine-readable code sent to clients in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::MalformedEvent(_) => "malformed_event",
            RelayError::EmptyPayload => "empty_payload",
            RelayError::NotAMember(_) => "not_a_member",
            RelayError::Unauthorized(_) => "unauthorized",
            RelayError::DeliveryDropped(_) => "delivery_dropped",
            RelayError::TransportFailure(_) => "transport_failure",
            RelayError::ConnectionNotFound(_) => "connection_not_found",
            RelayError::RoomLimit(_) => "room_limit",
            RelayError::AtCapacity(_) => "at_capacity",
            RelayError::Persistence(_) => "persistence",
            RelayError::Serialization(_) => "serialization",
        }
    }
}
