//! Heartbeat Loop
//!
//! Periodically sends a heartbeat to every adopted node that is due one. The
//! nodes of a round are contacted concurrently, so one stalled node costs
//! the round at most its own timeouts. Heartbeats are advisory: a node that
//! stops answering is backed off and eventually marked failed, nothing more.

use super::registry::{AdoptedNodes, HeartbeatPolicy};
use crate::adoption::{AdoptionClient, AdoptionError};
use crate::observability::metrics;
use flock_core::HeartbeatResponse;
use futures::future::join_all;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, trace, warn};

pub fn spawn_heartbeat_loop(
    registry: AdoptedNodes,
    policy: HeartbeatPolicy,
    connect_timeout: Duration,
    request_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(policy.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; nothing is adopted yet
        interval.tick().await;
        let mut round = 0u64;

        loop {
            interval.tick().await;
            round += 1;
            let reached = heartbeat_round(&registry, &policy, connect_timeout, request_timeout).await;
            trace!(round = round, reached = reached, "Heartbeat round completed");
        }
    })
}

/// Heartbeat every node due one, returning how many answered.
pub async fn heartbeat_round(
    registry: &AdoptedNodes,
    policy: &HeartbeatPolicy,
    connect_timeout: Duration,
    request_timeout: Duration,
) -> usize {
    let due = registry.due_for_heartbeat(policy, Instant::now()).await;
    if due.is_empty() {
        return 0;
    }

    let outcomes = join_all(due.iter().map(|(node_id, address)| async move {
        let outcome = send_heartbeat(*address, connect_timeout, request_timeout).await;
        match outcome {
            Ok(response) => {
                registry.mark_success(node_id).await;
                if response.reconfigure {
                    info!(node_id = %node_id, "Node requested reconfiguration");
                }
                true
            }
            Err(e) => {
                warn!(node_id = %node_id, address = %address, error = %e, "Heartbeat failed");
                metrics::record_heartbeat_failure();
                registry.mark_failure(node_id, policy, Instant::now()).await;
                false
            }
        }
    }))
    .await;

    outcomes.into_iter().filter(|reached| *reached).count()
}

async fn send_heartbeat(
    address: SocketAddr,
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<HeartbeatResponse, AdoptionError> {
    let mut client = AdoptionClient::connect(address, connect_timeout, request_timeout).await?;
    client.heartbeat().await
}
