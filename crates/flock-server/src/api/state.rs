//! Application State
//!
//! Shared state passed to all API handlers.

use crate::controller::AdoptedNodes;
use crate::node::FlockNode;
use crate::observability::MetricsState;
use kameo::prelude::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub node: ActorRef<FlockNode>,
    /// Nodes adopted by this process; empty unless it runs as controller
    pub adopted: AdoptedNodes,
    /// Set once the node has entered its initial mode
    pub readiness: Arc<AtomicBool>,
    pub metrics_state: Option<MetricsState>,
}
