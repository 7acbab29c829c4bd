//! Observability Module
//!
//! Logging, metrics and structured events for a flock node:
//! - `tracing`: subscriber setup with optional OpenTelemetry export
//! - `metrics`: Prometheus metrics for modes, discovery and adoption
//! - `events`: structured lifecycle events with consistent fields

pub mod events;
pub mod metrics;
pub mod tracing;

pub use metrics::{init_metrics, MetricsState};
pub use tracing::{init_tracing, shutdown_tracing, TracingConfig};
