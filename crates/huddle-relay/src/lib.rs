//! # Huddle Relay
//!
//! Real-time message relay for the Huddle group-chat platform.
//!
//! Every client currently viewing a channel receives messages sent by any
//! other client in that channel, without polling. This crate holds the
//! transport-agnostic core; the WebSocket gateway lives in `huddle-node`.
//!
//! ## Components
//!
//! - **Connection Registry**: live connections and their outbound queues
//! - **Room Directory**: channel id to member set, one lock per room
//! - **Relay Engine**: join, leave, publish and disconnect with fan-out
//! - **Collaborators**: authorization, identity and persistence seams
//!
//! ## Example
//!
//! ```rust
//! use huddle_relay::{MessagePayload, RelayEngine, ServerEvent};
//!
//! let engine = RelayEngine::default();
//!
//! let (alice, mut alice_rx) = engine.connect(None);
//! let (bob, mut bob_rx) = engine.connect(None);
//!
//! engine.handle_join(&alice.id, "general").unwrap();
//! engine.handle_join(&bob.id, "general").unwrap();
//!
//! engine
//!     .handle_publish(&alice.id, "general", MessagePayload::text("hi"))
//!     .unwrap();
//!
//! // Both members, the sender included, get the same envelope
//! assert!(matches!(alice_rx.try_recv(), Ok(ServerEvent::ReceiveMessage(_))));
//! assert!(matches!(bob_rx.try_recv(), Ok(ServerEvent::ReceiveMessage(_))));
//! ```
//!
//! ## Wire Protocol
//!
//! ### Client -> Server
//!
//! ```json
//! {"type": "join_channel", "roomId": "general"}
//! {"type": "leave_channel", "roomId": "general"}
//! {"type": "send_message", "roomId": "general", "content": "hi",
//!  "senderId": "u1", "senderDisplayName": "Ada", "clientTimestamp": "10:04 AM"}
//! {"type": "ping"}
//! ```
//!
//! ### Server -> Client
//!
//! ```json
//! {"type": "joined", "roomId": "general"}
//! {"type": "receive_message", "id": "...", "roomId": "general", "content": "hi",
//!  "author": {"id": "u1", "name": "Ada", "avatar": null},
//!  "timestamp": "10:04 AM", "seq": 1, "sender": "...", "receivedAt": 1700000000000}
//! {"type": "error", "code": "not_a_member", "message": "..."}
//! {"type": "pong"}
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 RelayEngine                  │
//! │  ┌──────────────────┐  ┌──────────────────┐  │
//! │  │ ConnectionRegistry│  │  RoomDirectory   │  │
//! │  │ id -> Connection │◄─┤ room -> members  │  │
//! │  │   └─> rooms      │  │ (mutex per room) │  │
//! │  │   └─> out queue  │  └──────────────────┘  │
//! │  └──────────────────┘                        │
//! │           │ try_send (bounded)               │
//! └───────────┼──────────────────────────────────┘
//!             ▼
//!     per-connection delivery task
//! ```

pub mod collaborator;
pub mod connection;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod room;

// Re-export main types
pub use collaborator::{
    AllowAll, Authorizer, ClaimedIdentity, IdentityProvider, MessageStore, PersistenceQueue,
    RoomAllowList,
};
pub use connection::{Connection, ConnectionId, OutboundReceiver};
pub use engine::{PublishReceipt, RelayConfig, RelayEngine, RelayStats};
pub use envelope::{Author, AuthorClaim, MessageEnvelope, MessagePayload};
pub use error::RelayError;
pub use protocol::{ClientEvent, SendMessage, ServerEvent};
pub use registry::ConnectionRegistry;
pub use room::{FanOut, JoinOutcome, RoomDirectory, RoomId};
