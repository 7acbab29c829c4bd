//! Controller Duties
//!
//! What a node does once it runs the control plane:
//!
//! ```text
//!   advertise(Controller) ──────────────────────────────────────────────
//!   browse(Pending) ──> event loop ──> Adopter ──> AdoptionClient ──> node
//!                                         │
//!                                         v
//!                                   AdoptedNodes <── heartbeat loop
//! ```

mod adopter;
mod heartbeat;
mod registry;
mod tracker;

pub use adopter::{Adopter, AdopterSettings, AttemptError};
pub use heartbeat::{heartbeat_round, spawn_heartbeat_loop};
pub use registry::{AdoptedNode, AdoptedNodeSummary, AdoptedNodes, HeartbeatPolicy, NodeHealth};
pub use tracker::{AttemptTracker, Skip};

use crate::discovery::{AdvertiseHandle, BrowseHandle, DiscoveryEngine, DiscoveryError};
use flock_core::{NodeIdentity, ServiceKind};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Buffered discovery events between the browser and the adopter.
const EVENT_BUFFER: usize = 64;

pub struct ControllerDuties {
    pub identity: NodeIdentity,
    pub metadata: BTreeMap<String, String>,
    pub adopter: Adopter,
    pub heartbeat: HeartbeatPolicy,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ControllerDuties {
    /// Advertise as controller, adopt pending nodes and heartbeat the adopted ones.
    pub fn start(self, discovery: &DiscoveryEngine) -> Result<ControllerHandle, DiscoveryError> {
        let advert = discovery.advertise(
            self.identity
                .presence(ServiceKind::Controller, self.metadata.clone()),
        )?;

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_BUFFER);
        let browse = discovery.browse(ServiceKind::Pending, self.identity.id.clone(), events_tx);

        let adopter = self.adopter.clone();
        let event_loop = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                adopter.handle_event(event).await;
            }
            debug!("Discovery event stream closed");
        });

        let heartbeat = spawn_heartbeat_loop(
            self.adopter.registry().clone(),
            self.heartbeat,
            self.connect_timeout,
            self.request_timeout,
        );

        info!(
            node_id = %self.identity.id,
            port = self.identity.listen_port,
            "Controller duties started"
        );

        Ok(ControllerHandle {
            advert,
            browse,
            event_loop,
            heartbeat,
            registry: self.adopter.registry().clone(),
        })
    }
}

/// Running controller duties.
pub struct ControllerHandle {
    advert: AdvertiseHandle,
    browse: BrowseHandle,
    event_loop: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    registry: AdoptedNodes,
}

impl ControllerHandle {
    pub fn registry(&self) -> &AdoptedNodes {
        &self.registry
    }

    /// Stop browsing and heartbeats, then withdraw the controller record.
    pub async fn shutdown(self) {
        self.browse.stop().await;
        if let Err(e) = self.event_loop.await {
            warn!(error = %e, "Controller event loop ended abnormally");
        }
        self.heartbeat.abort();
        self.advert.withdraw().await;
        info!("Controller duties stopped");
    }
}
