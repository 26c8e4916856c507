//! # Observability Module
//!
//! Logging and metrics for the relay node:
//!
//! - **Structured Logging**: pretty or JSON output via `tracing-subscriber`
//! - **Prometheus Metrics**: relay counters, socket gauges and frame counts
//!
//! ## Usage
//!
//! ```rust,ignore
//! use huddle_node::observability::{init_logging, LogFormat, MetricsState};
//!
//! init_logging("info", LogFormat::Json);
//! let metrics = MetricsState::new();
//! ```

mod logging;
mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{Direction, FrameLabels, MetricsState, RejectLabels};
