//! Node Status Endpoint
//!
//! Exposes the node's mode and, on a controller, its adopted nodes at GET /status

use super::AppState;
use crate::controller::AdoptedNodeSummary;
use crate::node::{GetStatus, NodeStatus};
use crate::version;
use axum::{extract::State, http::StatusCode, Json};
use flock_core::FlockMode;
use serde::Serialize;

/// Response for GET /status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub node: NodeStatus,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub adopted_nodes: Vec<AdoptedNodeSummary>,
}

/// GET /status - Current node state
#[tracing::instrument(skip(state))]
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    let node = state.node.ask(GetStatus).send().await.map_err(|e| {
        tracing::warn!(error = %e, "Failed to query node status");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let adopted_nodes = if node.mode == FlockMode::Controller {
        state.adopted.summaries().await
    } else {
        Vec::new()
    };

    Ok(Json(StatusResponse {
        node,
        version: version::VERSION,
        adopted_nodes,
    }))
}
