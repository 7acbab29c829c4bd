//! Node Runtime
//!
//! Wires the collaborators, the node actor, the adoption endpoint, the status
//! API and, when this node runs the control plane, the controller duties.
//!
//! Start order:
//! 1. Verify host prerequisites (unless disabled)
//! 2. Controller only: resolve self-IP and start the control plane (fatal)
//! 3. Bind the adoption port (fatal when no port is free)
//! 4. Spawn the node actor and the adoption endpoint
//! 5. Serve the status API
//! 6. Enter the initial mode

use crate::adoption::{authenticator_for, AdoptionServer};
use crate::api::{self, AppState};
use crate::config::{FlockConfig, StartMode};
use crate::control_plane::{ControlPlane, TokenIssuer};
use crate::controller::{
    AdoptedNodes, Adopter, AdopterSettings, ControllerDuties, ControllerHandle, HeartbeatPolicy,
};
use crate::discovery::{BeaconTransport, DiscoveryEngine};
use crate::metadata::{self, MetadataCollector};
use crate::net::{bind_open_port, resolve_self_ip};
use crate::node::{BecomeController, EnterPending, FlockNode, Promotion, Withdraw};
use crate::observability::MetricsState;
use anyhow::{anyhow, Context as _};
use flock_core::{NodeIdentity, Role};
use kameo::prelude::*;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// External systems the runtime drives.
pub struct Collaborators {
    pub control_plane: Arc<dyn ControlPlane>,
    pub token_issuer: Arc<dyn TokenIssuer>,
    pub metadata: Arc<dyn MetadataCollector>,
    pub transport: Arc<dyn BeaconTransport>,
}

pub struct NodeRuntime {
    config: FlockConfig,
    identity: NodeIdentity,
    metadata: BTreeMap<String, String>,
    node: ActorRef<FlockNode>,
    discovery: DiscoveryEngine,
    control_plane: Arc<dyn ControlPlane>,
    token_issuer: Arc<dyn TokenIssuer>,
    adopted: AdoptedNodes,
    readiness: Arc<AtomicBool>,
    promotions: mpsc::UnboundedReceiver<Promotion>,
    controller: Option<ControllerHandle>,
    adoption_addr: SocketAddr,
    status_addr: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    server: JoinHandle<()>,
    status_api: Option<JoinHandle<()>>,
}

/// Node id from configuration, else the hostname, else a random one.
pub fn resolve_node_id(configured: Option<&str>) -> String {
    if let Some(id) = configured.filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    metadata::hostname()
        .filter(|hostname| !hostname.is_empty())
        .unwrap_or_else(|| format!("flock-node-{}", uuid::Uuid::new_v4()))
}

impl NodeRuntime {
    pub async fn start(
        config: FlockConfig,
        mode: StartMode,
        collaborators: Collaborators,
        metrics_state: Option<MetricsState>,
    ) -> anyhow::Result<Self> {
        let Collaborators {
            control_plane,
            token_issuer,
            metadata,
            transport,
        } = collaborators;

        let node_id = resolve_node_id(config.node_id.as_deref());
        info!(node_id = %node_id, mode = %mode, "Starting compute-flock node");

        let role = match mode {
            StartMode::Controller => Role::Controller,
            StartMode::Agent => Role::Agent,
        };
        if config.no_verify {
            warn!("Skipping prerequisite checks");
        } else {
            control_plane
                .verify_prerequisites(role)
                .await
                .context("prerequisite check failed")?;
        }

        let self_ip = match mode {
            StartMode::Controller => {
                let ip = start_control_plane(&config, control_plane.as_ref()).await?;
                Some(ip)
            }
            StartMode::Agent => None,
        };

        let (listener, port) = bind_open_port(config.default_port)
            .await
            .ok_or_else(|| anyhow!("no free port at or above {}", config.default_port))?;
        let adoption_addr = listener
            .local_addr()
            .context("failed to read adoption listener address")?;

        let identity = NodeIdentity::new(node_id, port);
        let metadata = metadata.collect();
        let discovery = DiscoveryEngine::new(transport, config.announce_interval, config.record_ttl);

        let (promotions_tx, promotions) = mpsc::unbounded_channel();
        let node = FlockNode::spawn(FlockNode::new(
            identity.clone(),
            discovery.clone(),
            metadata.clone(),
            control_plane.clone(),
            config.control_plane_port,
            promotions_tx,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let authenticator = authenticator_for(config.bootstrap_secret.as_deref());
        let server = AdoptionServer::new(listener, node.clone(), authenticator)
            .with_idle_timeout(config.connection_idle_timeout)
            .spawn(shutdown_rx.clone());

        let adopted = AdoptedNodes::new();
        let readiness = Arc::new(AtomicBool::new(false));
        let (status_api, status_addr) = match config.status_addr {
            Some(addr) => {
                let state = AppState {
                    node: node.clone(),
                    adopted: adopted.clone(),
                    readiness: readiness.clone(),
                    metrics_state,
                };
                let (handle, bound) = api::serve(addr, state, shutdown_rx)
                    .await
                    .with_context(|| format!("failed to serve status API on {addr}"))?;
                (Some(handle), Some(bound))
            }
            None => (None, None),
        };

        let mut runtime = Self {
            config,
            identity,
            metadata,
            node,
            discovery,
            control_plane,
            token_issuer,
            adopted,
            readiness,
            promotions,
            controller: None,
            adoption_addr,
            status_addr,
            shutdown_tx,
            server,
            status_api,
        };

        match self_ip {
            Some(self_ip) => {
                runtime
                    .node
                    .ask(BecomeController)
                    .send()
                    .await
                    .context("failed to enter controller mode")?;
                runtime.start_controller_duties(self_ip)?;
            }
            None => {
                runtime
                    .node
                    .ask(EnterPending)
                    .send()
                    .await
                    .context("failed to enter pending mode")?;
            }
        }

        runtime.readiness.store(true, Ordering::Release);
        info!(
            node_id = %runtime.identity.id,
            adoption_addr = %runtime.adoption_addr,
            "Node ready"
        );
        Ok(runtime)
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn node(&self) -> &ActorRef<FlockNode> {
        &self.node
    }

    /// Address the adoption endpoint is bound to.
    pub fn adoption_addr(&self) -> SocketAddr {
        self.adoption_addr
    }

    /// Address the status API is bound to, when enabled.
    pub fn status_addr(&self) -> Option<SocketAddr> {
        self.status_addr
    }

    pub fn adopted(&self) -> &AdoptedNodes {
        &self.adopted
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.load(Ordering::Acquire)
    }

    fn start_controller_duties(&mut self, self_ip: IpAddr) -> anyhow::Result<()> {
        let config = &self.config;
        let settings = AdopterSettings {
            self_ip,
            role: Role::Agent,
            token_ttl: config.token_ttl,
            token_purpose: config.token_purpose.clone(),
            bootstrap_secret: config.bootstrap_secret.clone(),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            cooldown: config.adoption_cooldown,
        };
        let duties = ControllerDuties {
            identity: self.identity.clone(),
            metadata: self.metadata.clone(),
            adopter: Adopter::new(settings, self.token_issuer.clone(), self.adopted.clone()),
            heartbeat: HeartbeatPolicy::from(config),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
        };
        let handle = duties
            .start(&self.discovery)
            .context("failed to start controller duties")?;
        self.controller = Some(handle);
        Ok(())
    }

    /// Take over the controller role after a handoff adoption.
    async fn handle_promotion(&mut self, promotion: Promotion) -> anyhow::Result<()> {
        info!(
            node_id = %self.identity.id,
            requested_by = %promotion.requested_by,
            "Promoted to controller"
        );
        if self.controller.is_some() {
            return Ok(());
        }
        if !self.config.no_verify {
            self.control_plane
                .verify_prerequisites(Role::Controller)
                .await
                .context("prerequisite check failed")?;
        }
        let self_ip = start_control_plane(&self.config, self.control_plane.as_ref()).await?;
        self.start_controller_duties(self_ip)
    }

    /// Run until `shutdown` resolves or a fatal error occurs, then stop everything.
    pub async fn run_until<F>(mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                Some(promotion) = self.promotions.recv() => {
                    if let Err(e) = self.handle_promotion(promotion).await {
                        error!(error = %e, "Controller handoff failed");
                        break Err(e);
                    }
                }
            }
        };

        self.shutdown().await;
        result
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn run_until_shutdown(self) -> anyhow::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler")?;
            self.run_until(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            })
            .await
        }
        #[cfg(not(unix))]
        {
            self.run_until(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
        }
    }

    async fn shutdown(self) {
        if let Err(e) = self.node.ask(Withdraw).send().await {
            warn!(error = %e, "Failed to withdraw presence");
        }
        if let Some(controller) = self.controller {
            controller.shutdown().await;
        }

        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.server.await {
            warn!(error = %e, "Adoption endpoint ended abnormally");
        }
        if let Some(status_api) = self.status_api {
            if let Err(e) = status_api.await {
                warn!(error = %e, "Status API ended abnormally");
            }
        }

        let _ = self.node.stop_gracefully().await;
        info!(node_id = %self.identity.id, "Node stopped");
    }
}

/// Resolve the address handed to adopted nodes and bring up the local control plane.
async fn start_control_plane(
    config: &FlockConfig,
    control_plane: &dyn ControlPlane,
) -> anyhow::Result<IpAddr> {
    let self_ip =
        resolve_self_ip(config.advertise_ip).context("failed to determine local IP address")?;
    info!(self_ip = %self_ip, "Starting control plane");
    control_plane
        .start_as_controller(config.control_plane_timeout)
        .await
        .context("control plane failed to start")?;
    Ok(self_ip)
}
