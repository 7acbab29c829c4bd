//! Adopter
//!
//! Turns `Added` events for pending nodes into adoption attempts. Each
//! admitted attempt runs on its own task: connect, mint a join token, send
//! the claim. Attempts for one node are spaced by the cooldown whatever
//! their outcome, so a node that keeps advertising as pending (a failed
//! join, a reboot) is claimed again once the cooldown has passed.

use super::registry::AdoptedNodes;
use super::tracker::{AttemptTracker, Skip};
use crate::adoption::{AdoptionClient, AdoptionError};
use crate::control_plane::{ControlPlaneError, TokenIssuer};
use crate::observability::{events, metrics};
use flock_core::{AdoptRequest, AdoptResponse, DiscoveryEvent, DiscoveryOp, PresenceRecord, Role};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Re-check interval while another attempt for the same node is running
const IN_FLIGHT_RECHECK: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("adoption rpc failed: {0}")]
    Rpc(#[from] AdoptionError),
    #[error("failed to mint join token: {0}")]
    Token(#[from] ControlPlaneError),
}

/// Fixed parameters of every adoption attempt.
#[derive(Debug, Clone)]
pub struct AdopterSettings {
    /// Address handed to adopted nodes as the controller address
    pub self_ip: IpAddr,
    pub role: Role,
    pub token_ttl: Duration,
    pub token_purpose: String,
    pub bootstrap_secret: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub cooldown: Duration,
}

#[derive(Clone)]
pub struct Adopter {
    settings: Arc<AdopterSettings>,
    issuer: Arc<dyn TokenIssuer>,
    tracker: Arc<Mutex<AttemptTracker>>,
    registry: AdoptedNodes,
}

impl Adopter {
    pub fn new(settings: AdopterSettings, issuer: Arc<dyn TokenIssuer>, registry: AdoptedNodes) -> Self {
        let tracker = AttemptTracker::new(settings.cooldown);
        Self {
            settings: Arc::new(settings),
            issuer,
            tracker: Arc::new(Mutex::new(tracker)),
            registry,
        }
    }

    pub fn registry(&self) -> &AdoptedNodes {
        &self.registry
    }

    /// React to one discovery event. Returns the attempt task when one was started.
    ///
    /// A sighting that arrives while the node is cooling down or has an
    /// attempt in flight is not dropped: one re-check is parked per node and
    /// fires when the tracker admits it, as long as the node keeps advertising.
    pub async fn handle_event(&self, event: DiscoveryEvent) -> Option<JoinHandle<()>> {
        match event.op {
            DiscoveryOp::Removed => {
                events::node_departed(&event.record.node_id);
                self.tracker.lock().await.mark_departed(&event.record.node_id);
                None
            }
            DiscoveryOp::Added => {
                let node_id = event.record.node_id.clone();
                let Some(address) = pick_address(&event.addresses, self.settings.self_ip) else {
                    debug!(node_id = %node_id, "No usable address for discovered node");
                    return None;
                };

                events::node_discovered(&node_id, address, event.record.port);
                log_candidate(&event.record, address);

                let target = SocketAddr::new(address, event.record.port);
                let now = Instant::now();
                let mut tracker = self.tracker.lock().await;
                tracker.mark_present(&node_id);
                tracker.prune(now);
                if let Err(skip) = tracker.try_begin(&node_id, now) {
                    let wait = match skip {
                        Skip::InFlight => {
                            debug!(node_id = %node_id, "Adoption already in flight");
                            IN_FLIGHT_RECHECK
                        }
                        Skip::CoolingDown { remaining } => {
                            debug!(
                                node_id = %node_id,
                                remaining_ms = remaining.as_millis() as u64,
                                "Adoption cooling down"
                            );
                            remaining
                        }
                    };
                    if tracker.defer(&node_id) {
                        self.spawn_recheck(node_id, target, wait);
                    }
                    return None;
                }
                drop(tracker);

                let adopter = self.clone();
                Some(tokio::spawn(async move {
                    adopter.run_attempt(node_id, target).await;
                }))
            }
        }
    }

    /// Wait out a skip, then attempt again if the node is still advertised.
    fn spawn_recheck(&self, node_id: String, target: SocketAddr, wait: Duration) {
        let adopter = self.clone();
        tokio::spawn(async move {
            let mut wait = wait;
            loop {
                tokio::time::sleep(wait).await;
                let mut tracker = adopter.tracker.lock().await;
                if !tracker.is_present(&node_id) || !tracker.is_deferred(&node_id) {
                    return;
                }
                match tracker.try_begin(&node_id, Instant::now()) {
                    Ok(()) => {
                        tracker.clear_deferred(&node_id);
                        break;
                    }
                    Err(Skip::InFlight) => wait = IN_FLIGHT_RECHECK,
                    Err(Skip::CoolingDown { remaining }) => wait = remaining,
                }
            }
            debug!(node_id = %node_id, "Retrying node still advertised as pending");
            adopter.run_attempt(node_id, target).await;
        });
    }

    async fn run_attempt(&self, node_id: String, target: SocketAddr) {
        let role = self.settings.role;
        let target_str = target.to_string();
        let started = Instant::now();
        events::adoption_started(&node_id, &target_str, &role.to_string());

        match self.adopt_node(target, role).await {
            Ok(response) if response.accepted => {
                events::adoption_succeeded(&node_id, &target_str, &response.message);
                metrics::record_adoption_attempt("accepted", started.elapsed());
                self.registry.insert(&node_id, target).await;
            }
            Ok(response) => {
                events::adoption_failed(&node_id, &target_str, &response.message);
                metrics::record_adoption_attempt("rejected", started.elapsed());
            }
            Err(e) => {
                events::adoption_failed(&node_id, &target_str, &e.to_string());
                metrics::record_adoption_attempt("error", started.elapsed());
            }
        }

        self.tracker.lock().await.finish(&node_id, Instant::now());
    }

    /// Claim the node listening at `target` for `role`.
    pub async fn adopt_node(&self, target: SocketAddr, role: Role) -> Result<AdoptResponse, AttemptError> {
        let settings = &self.settings;
        let mut client =
            AdoptionClient::connect(target, settings.connect_timeout, settings.request_timeout).await?;

        let credential = self
            .issuer
            .issue(&settings.token_purpose, settings.token_ttl)
            .await?;

        let request = AdoptRequest {
            cluster_token: credential.token,
            controller_address: settings.self_ip.to_string(),
            role,
            bootstrap_secret: settings.bootstrap_secret.clone(),
        };
        Ok(client.adopt(request).await?)
    }
}

/// First observed address that is not this controller's own.
fn pick_address(addresses: &[IpAddr], self_ip: IpAddr) -> Option<IpAddr> {
    addresses.iter().copied().find(|addr| *addr != self_ip)
}

fn log_candidate(record: &PresenceRecord, address: IpAddr) {
    info!(
        node_id = %record.node_id,
        ip = %address,
        os = %record.meta("os"),
        distro = %record.meta("distro"),
        cpu_threads = %record.meta("cpu"),
        mem_gib = %record.meta("mem"),
        disk_gib = %record.meta("disk"),
        mac = %record.meta("mac"),
        vendor = %record.meta("vendor"),
        "Discovered candidate node"
    );
}
