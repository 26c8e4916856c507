//! Prometheus metrics collection.
//!
//! Socket-level gauges and frame counters are updated by the gateway as
//! traffic flows. Relay gauges mirror [`RelayStats`] and are refreshed at
//! scrape time.

use huddle_relay::RelayStats;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Frame direction relative to the relay.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Direction {
    /// Client to relay.
    Inbound,
    /// Relay to client.
    Outbound,
}

/// WebSocket frame labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FrameLabels {
    /// Frame direction.
    pub direction: Direction,
}

/// Rejected event labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RejectLabels {
    /// Error code sent to the client.
    pub code: String,
}

/// Metrics state container.
#[derive(Clone, Debug)]
pub struct MetricsState {
    registry: Arc<Registry>,
    /// Open WebSocket connections.
    pub websocket_connections: Gauge,
    /// WebSocket text frames by direction.
    pub frames_total: Family<FrameLabels, Counter>,
    /// Client events answered with an error, by code.
    pub rejected_total: Family<RejectLabels, Counter>,
    relay_connections: Gauge,
    relay_rooms: Gauge,
    relay_messages: Gauge,
    relay_deliveries: Gauge,
    relay_dropped_deliveries: Gauge,
    relay_persistence_dropped: Gauge,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let websocket_connections = Gauge::default();
        registry.register(
            "huddle_websocket_connections",
            "Active WebSocket connections",
            websocket_connections.clone(),
        );

        let frames_total = Family::<FrameLabels, Counter>::default();
        registry.register(
            "huddle_websocket_frames",
            "WebSocket text frames by direction",
            frames_total.clone(),
        );

        let rejected_total = Family::<RejectLabels, Counter>::default();
        registry.register(
            "huddle_rejected_events",
            "Client events answered with an error",
            rejected_total.clone(),
        );

        let relay_connections = Gauge::default();
        registry.register(
            "huddle_relay_connections",
            "Connections registered with the relay",
            relay_connections.clone(),
        );

        let relay_rooms = Gauge::default();
        registry.register(
            "huddle_relay_rooms",
            "Rooms with at least one member",
            relay_rooms.clone(),
        );

        let relay_messages = Gauge::default();
        registry.register(
            "huddle_relay_messages",
            "Messages fanned out since start",
            relay_messages.clone(),
        );

        let relay_deliveries = Gauge::default();
        registry.register(
            "huddle_relay_deliveries",
            "Envelopes accepted by member queues since start",
            relay_deliveries.clone(),
        );

        let relay_dropped_deliveries = Gauge::default();
        registry.register(
            "huddle_relay_dropped_deliveries",
            "Events dropped on full or closed queues since start",
            relay_dropped_deliveries.clone(),
        );

        let relay_persistence_dropped = Gauge::default();
        registry.register(
            "huddle_relay_persistence_dropped",
            "Envelopes the persistence queue could not accept",
            relay_persistence_dropped.clone(),
        );

        Self {
            registry: Arc::new(registry),
            websocket_connections,
            frames_total,
            rejected_total,
            relay_connections,
            relay_rooms,
            relay_messages,
            relay_deliveries,
            relay_dropped_deliveries,
            relay_persistence_dropped,
        }
    }

    /// Count one WebSocket frame.
    pub fn record_frame(&self, direction: Direction) {
        self.frames_total
            .get_or_create(&FrameLabels { direction })
            .inc();
    }

    /// Count one rejected client event.
    pub fn record_rejection(&self, code: &str) {
        self.rejected_total
            .get_or_create(&RejectLabels {
                code: code.to_string(),
            })
            .inc();
    }

    /// Refresh relay gauges from a stats snapshot.
    pub fn observe_relay(&self, stats: &RelayStats) {
        self.relay_connections.set(stats.current_connections as i64);
        self.relay_rooms.set(stats.current_rooms as i64);
        self.relay_messages.set(stats.total_messages as i64);
        self.relay_deliveries.set(stats.total_deliveries as i64);
        self.relay_dropped_deliveries
            .set(stats.dropped_deliveries as i64);
        self.relay_persistence_dropped
            .set(stats.persistence_dropped as i64);
    }

    /// Encode metrics for Prometheus scraping.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}
