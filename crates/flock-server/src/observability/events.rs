//! Structured Events
//!
//! Each lifecycle event has a dedicated function so field names stay
//! consistent across the node and controller code paths.
//!
//! Event types:
//! - `mode_changed` - Node lifecycle transition
//! - `node_discovered` - Pending node seen by a controller
//! - `node_departed` - Pending node withdrew or expired
//! - `adoption_started` - Controller began claiming a node
//! - `adoption_succeeded` - Node accepted the claim
//! - `adoption_failed` - Claim attempt failed or was rejected
//! - `adoption_received` - Node accepted an inbound claim
//! - `adoption_rejected` - Node refused an inbound claim
//! - `join_failed` - Control plane join failed after acceptance

use flock_core::FlockMode;
use std::net::IpAddr;
use tracing::{error, info, warn};

pub fn mode_changed(node_id: &str, previous: FlockMode, new: FlockMode, reason: &str) {
    info!(
        event_type = "mode_changed",
        node_id = %node_id,
        previous_mode = %previous,
        new_mode = %new,
        reason = %reason,
        "Mode changed"
    );
}

pub fn node_discovered(node_id: &str, address: IpAddr, port: u16) {
    info!(
        event_type = "node_discovered",
        node_id = %node_id,
        address = %address,
        port = port,
        "Pending node discovered"
    );
}

pub fn node_departed(node_id: &str) {
    info!(
        event_type = "node_departed",
        node_id = %node_id,
        "Pending node departed"
    );
}

pub fn adoption_started(node_id: &str, target: &str, role: &str) {
    info!(
        event_type = "adoption_started",
        node_id = %node_id,
        target = %target,
        role = %role,
        "Adopting node"
    );
}

pub fn adoption_succeeded(node_id: &str, target: &str, message: &str) {
    info!(
        event_type = "adoption_succeeded",
        node_id = %node_id,
        target = %target,
        message = %message,
        "Node adopted"
    );
}

pub fn adoption_failed(node_id: &str, target: &str, reason: &str) {
    warn!(
        event_type = "adoption_failed",
        node_id = %node_id,
        target = %target,
        reason = %reason,
        "Adoption failed"
    );
}

pub fn adoption_received(controller_address: &str, role: &str, peer: &str) {
    info!(
        event_type = "adoption_received",
        controller_address = %controller_address,
        role = %role,
        peer = %peer,
        "Adoption accepted"
    );
}

pub fn adoption_rejected(peer: &str, reason: &str) {
    warn!(
        event_type = "adoption_rejected",
        peer = %peer,
        reason = %reason,
        "Adoption rejected"
    );
}

pub fn join_failed(node_id: &str, controller_url: &str, error: &str) {
    error!(
        event_type = "join_failed",
        node_id = %node_id,
        controller_url = %controller_url,
        error = %error,
        "Joining the cluster failed, returning to pending"
    );
}
