//! # Huddle Node
//!
//! HTTP and WebSocket front end for the Huddle real-time message relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Huddle Node                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │                    HTTP Layer (axum)                  │  │
//! │  │  • /ws              WebSocket gateway                 │  │
//! │  │  • /health          Liveness                          │  │
//! │  │  • /api/relay/stats Relay statistics                  │  │
//! │  │  • /metrics         Prometheus exposition             │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                              │                              │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │                 Relay Engine (huddle-relay)           │  │
//! │  │  • Connection registry and room directory             │  │
//! │  │  • Sequenced fan-out to bounded outbound queues       │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                              │                              │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │                    Collaborators                      │  │
//! │  │  • Room allow list                                    │  │
//! │  │  • HTTP message store                                 │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin huddle-node -- --port 3001
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Router, CORS, health and metrics endpoints
//! - [`gateway`] - WebSocket transport gateway
//! - [`config`] - Layered node configuration
//! - [`persistence`] - HTTP message store
//! - [`observability`] - Structured logging and metrics

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod persistence;

use huddle_relay::{PersistenceQueue, RelayEngine, RoomAllowList};
use std::sync::Arc;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::config::NodeConfig;
use crate::error::Result;
use crate::observability::MetricsState;
use crate::persistence::HttpMessageStore;

/// Build the shared application state from configuration.
///
/// Spawns the persistence worker when an endpoint is configured, so it must
/// be called from within a tokio runtime.
pub fn build_state(config: &NodeConfig) -> Result<AppState> {
    let mut engine = RelayEngine::new(config.relay.clone());

    if !config.authorization.rooms.is_empty() {
        info!(
            restricted_rooms = config.authorization.rooms.len(),
            "Room allow list enabled"
        );
        let allow_list = RoomAllowList::from(config.authorization.rooms.clone());
        engine = engine.with_authorizer(Arc::new(allow_list));
    }

    if let Some(endpoint) = &config.persistence.endpoint {
        let store = HttpMessageStore::new(endpoint.clone(), config.persistence.timeout())?;
        let (queue, _worker) = PersistenceQueue::spawn(
            Arc::new(store),
            config.relay.persistence_queue_capacity,
        );
        info!(endpoint = %endpoint, "Message persistence enabled");
        engine = engine.with_persistence(queue);
    }

    let user_header = config.authorization.user_header()?;
    if let Some(header) = &user_header {
        info!(header = %header, "Connection identity taken from trusted header");
    }

    Ok(AppState {
        engine: Arc::new(engine),
        metrics: MetricsState::new(),
        max_message_bytes: config.max_message_bytes,
        user_header,
    })
}

/// Serve the relay until ctrl-c.
pub async fn run(config: NodeConfig) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let app = create_router(state, &config.allowed_origins);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        addr = %addr,
        allowed_origins = ?config.allowed_origins,
        "Relay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
