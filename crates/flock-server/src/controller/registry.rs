//! Adopted Node Registry
//!
//! Tracks nodes this controller adopted and their heartbeat health.

use crate::config::FlockConfig;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Heartbeat reachability of an adopted node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    /// Last heartbeat succeeded
    Reachable,
    /// Recent heartbeats failed
    Unreachable,
    /// Too many consecutive failures; heartbeats stop
    Failed,
}

/// Failure thresholds for heartbeats
#[derive(Debug, Clone)]
pub struct HeartbeatPolicy {
    pub interval: Duration,
    /// Failures before exponential backoff kicks in
    pub failure_threshold: u32,
    /// Consecutive failures before a node is marked failed
    pub max_failures: u32,
    pub backoff_base: u64,
    pub max_backoff_power: u32,
}

impl From<&FlockConfig> for HeartbeatPolicy {
    fn from(config: &FlockConfig) -> Self {
        Self {
            interval: config.heartbeat_interval,
            failure_threshold: config.failure_threshold,
            max_failures: config.max_failures,
            backoff_base: config.backoff_base,
            max_backoff_power: config.max_backoff_power,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdoptedNode {
    pub node_id: String,
    pub address: SocketAddr,
    pub adopted_at: DateTime<Utc>,
    pub health: NodeHealth,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
}

impl AdoptedNode {
    pub fn new(node_id: String, address: SocketAddr) -> Self {
        Self {
            node_id,
            address,
            adopted_at: Utc::now(),
            health: NodeHealth::Reachable,
            consecutive_failures: 0,
            last_failure: None,
        }
    }

    /// Whether this round's heartbeat should be skipped.
    pub fn should_skip_heartbeat(&self, policy: &HeartbeatPolicy, now: Instant) -> bool {
        match self.health {
            NodeHealth::Reachable => false,
            NodeHealth::Failed => true,
            NodeHealth::Unreachable => {
                if self.consecutive_failures <= policy.failure_threshold {
                    return false;
                }
                match self.last_failure {
                    Some(last_failure) => {
                        let backoff = Duration::from_secs(
                            policy
                                .backoff_base
                                .saturating_pow(self.consecutive_failures.min(policy.max_backoff_power)),
                        );
                        now.saturating_duration_since(last_failure) < backoff
                    }
                    None => true,
                }
            }
        }
    }

    pub fn mark_success(&mut self) {
        self.health = NodeHealth::Reachable;
        self.consecutive_failures = 0;
        self.last_failure = None;
    }

    pub fn mark_failure(&mut self, policy: &HeartbeatPolicy, now: Instant) {
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        self.health = if self.consecutive_failures >= policy.max_failures {
            NodeHealth::Failed
        } else {
            NodeHealth::Unreachable
        };
    }

    pub fn summary(&self) -> AdoptedNodeSummary {
        AdoptedNodeSummary {
            node_id: self.node_id.clone(),
            address: self.address,
            adopted_at: self.adopted_at,
            health: self.health,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

/// Serializable view for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct AdoptedNodeSummary {
    pub node_id: String,
    pub address: SocketAddr,
    pub adopted_at: DateTime<Utc>,
    pub health: NodeHealth,
    pub consecutive_failures: u32,
}

/// Shared registry of adopted nodes
#[derive(Clone, Default)]
pub struct AdoptedNodes {
    nodes: Arc<RwLock<HashMap<String, AdoptedNode>>>,
}

impl AdoptedNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, node_id: &str, address: SocketAddr) {
        let mut nodes = self.nodes.write().await;
        nodes.insert(node_id.to_string(), AdoptedNode::new(node_id.to_string(), address));
        metrics::set_adopted_nodes(nodes.len());
        debug!(node_id = %node_id, address = %address, "Registered adopted node");
    }

    pub async fn contains(&self, node_id: &str) -> bool {
        self.nodes.read().await.contains_key(node_id)
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    /// Nodes due a heartbeat this round.
    pub async fn due_for_heartbeat(&self, policy: &HeartbeatPolicy, now: Instant) -> Vec<(String, SocketAddr)> {
        self.nodes
            .read()
            .await
            .values()
            .filter(|node| !node.should_skip_heartbeat(policy, now))
            .map(|node| (node.node_id.clone(), node.address))
            .collect()
    }

    pub async fn mark_success(&self, node_id: &str) {
        if let Some(node) = self.nodes.write().await.get_mut(node_id) {
            node.mark_success();
        }
    }

    pub async fn mark_failure(&self, node_id: &str, policy: &HeartbeatPolicy, now: Instant) {
        if let Some(node) = self.nodes.write().await.get_mut(node_id) {
            node.mark_failure(policy, now);
            if node.health == NodeHealth::Failed {
                warn!(
                    node_id = %node_id,
                    consecutive_failures = node.consecutive_failures,
                    "Adopted node marked failed"
                );
            }
        }
    }

    pub async fn get(&self, node_id: &str) -> Option<AdoptedNode> {
        self.nodes.read().await.get(node_id).cloned()
    }

    pub async fn summaries(&self) -> Vec<AdoptedNodeSummary> {
        let mut summaries: Vec<_> = self
            .nodes
            .read()
            .await
            .values()
            .map(AdoptedNode::summary)
            .collect();
        summaries.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        summaries
    }
}
