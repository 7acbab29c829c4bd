//! FlockNode Message Types

use crate::discovery::DiscoveryError;
use flock_core::{AdoptRequest, AdoptResponse, FlockMode};
use kameo::Reply;
use serde::Serialize;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: FlockMode, to: FlockMode },
    #[error("failed to advertise presence: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// Start advertising as an unclaimed node.
#[derive(Debug, Clone)]
pub struct EnterPending;

/// Operator directive: run the controller on this node.
#[derive(Debug, Clone)]
pub struct BecomeController;

/// Inbound claim received by the adoption endpoint.
#[derive(Debug, Clone)]
pub struct AdoptNode {
    pub request: AdoptRequest,
    /// Remote end of the connection the claim arrived on
    pub peer: SocketAddr,
}

/// Result of an inbound claim.
#[derive(Debug, Clone, Reply)]
pub struct AdoptOutcome {
    pub response: AdoptResponse,
    /// Mode entered as a result of the claim, if it was accepted
    pub transition: Option<FlockMode>,
}

/// Completion of the asynchronous control-plane join.
#[derive(Debug, Clone)]
pub struct JoinFinished {
    pub controller_url: String,
    pub result: Result<(), String>,
}

/// Stop advertising; sent on shutdown.
#[derive(Debug, Clone)]
pub struct Withdraw;

#[derive(Debug, Clone)]
pub struct GetStatus;

/// Snapshot of the node for the status endpoint.
#[derive(Debug, Clone, Serialize, Reply)]
pub struct NodeStatus {
    pub node_id: String,
    pub listen_port: u16,
    pub mode: FlockMode,
    /// Whether a pending record is currently advertised
    pub advertising: bool,
    /// Controller that adopted this node
    pub controller_address: Option<String>,
}
