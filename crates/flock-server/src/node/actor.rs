//! FlockNode Actor

use super::messages::{
    AdoptNode, AdoptOutcome, BecomeController, EnterPending, GetStatus, JoinFinished, NodeError,
    NodeStatus, Withdraw,
};
use crate::control_plane::{control_plane_url, ControlPlane};
use crate::discovery::{AdvertiseHandle, DiscoveryEngine};
use crate::observability::{events, metrics};
use flock_core::{AdoptResponse, FlockMode, NodeIdentity, Role, ServiceKind};
use kameo::{
    message::{Context, Message},
    Actor,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Handoff notice: a controller asked this node to take over the controller role.
#[derive(Debug, Clone)]
pub struct Promotion {
    pub requested_by: SocketAddr,
}

/// Owner of the node's lifecycle mode.
#[derive(Actor)]
pub struct FlockNode {
    identity: NodeIdentity,
    mode: FlockMode,
    discovery: DiscoveryEngine,
    /// Metadata carried in the pending record
    metadata: BTreeMap<String, String>,
    control_plane: Arc<dyn ControlPlane>,
    control_plane_port: u16,
    promotions: mpsc::UnboundedSender<Promotion>,
    advert: Option<AdvertiseHandle>,
    controller_address: Option<String>,
}

impl FlockNode {
    pub fn new(
        identity: NodeIdentity,
        discovery: DiscoveryEngine,
        metadata: BTreeMap<String, String>,
        control_plane: Arc<dyn ControlPlane>,
        control_plane_port: u16,
        promotions: mpsc::UnboundedSender<Promotion>,
    ) -> Self {
        Self {
            identity,
            mode: FlockMode::Pending,
            discovery,
            metadata,
            control_plane,
            control_plane_port,
            promotions,
            advert: None,
            controller_address: None,
        }
    }

    fn transition(&mut self, to: FlockMode, reason: &str) {
        let from = self.mode;
        self.mode = to;
        events::mode_changed(&self.identity.id, from, to, reason);
        metrics::record_mode(to);
    }

    fn advertise_pending(&mut self) -> Result<(), NodeError> {
        if self.advert.is_some() {
            return Ok(());
        }
        let record = self
            .identity
            .presence(ServiceKind::Pending, self.metadata.clone());
        self.advert = Some(self.discovery.advertise(record)?);
        Ok(())
    }

    async fn withdraw_advert(&mut self) {
        if let Some(advert) = self.advert.take() {
            advert.withdraw().await;
        }
    }
}

impl Message<EnterPending> for FlockNode {
    type Reply = Result<(), NodeError>;

    async fn handle(
        &mut self,
        _msg: EnterPending,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.mode != FlockMode::Pending {
            return Err(NodeError::InvalidTransition {
                from: self.mode,
                to: FlockMode::Pending,
            });
        }
        self.advertise_pending()?;
        metrics::set_mode(FlockMode::Pending);
        info!(node_id = %self.identity.id, port = self.identity.listen_port, "Waiting for adoption");
        Ok(())
    }
}

impl Message<BecomeController> for FlockNode {
    type Reply = Result<(), NodeError>;

    async fn handle(
        &mut self,
        _msg: BecomeController,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.mode != FlockMode::Pending {
            return Err(NodeError::InvalidTransition {
                from: self.mode,
                to: FlockMode::Controller,
            });
        }
        self.withdraw_advert().await;
        self.transition(FlockMode::Controller, "operator directive");
        Ok(())
    }
}

impl Message<AdoptNode> for FlockNode {
    type Reply = AdoptOutcome;

    async fn handle(&mut self, msg: AdoptNode, ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let AdoptNode { request, peer } = msg;

        if self.mode != FlockMode::Pending {
            let reason = format!("node {} is already {}", self.identity.id, self.mode);
            events::adoption_rejected(&peer.to_string(), &reason);
            metrics::record_adoption_request("rejected");
            return AdoptOutcome {
                response: AdoptResponse::rejected(reason),
                transition: None,
            };
        }

        events::adoption_received(&request.controller_address, &request.role.to_string(), &peer.to_string());
        metrics::record_adoption_request("accepted");

        // Mode flips before any await so no later claim can observe Pending
        let target = request.role.target_mode();
        self.controller_address = Some(request.controller_address.clone());
        self.transition(target, "adopted");
        self.withdraw_advert().await;

        match request.role {
            Role::Agent => {
                let controller_url =
                    control_plane_url(&request.controller_address, self.control_plane_port);
                let control_plane = self.control_plane.clone();
                let node = ctx.actor_ref().clone();
                let token = request.cluster_token;

                tokio::spawn(async move {
                    let result = control_plane
                        .join_as_agent(&controller_url, &token)
                        .await
                        .map_err(|e| e.to_string());
                    let finished = JoinFinished {
                        controller_url,
                        result,
                    };
                    if let Err(e) = node.tell(finished).send().await {
                        warn!(error = %e, "Node stopped before join completed");
                    }
                });

                AdoptOutcome {
                    response: AdoptResponse::accepted("Adoption started"),
                    transition: Some(target),
                }
            }
            Role::Controller => {
                if self.promotions.send(Promotion { requested_by: peer }).is_err() {
                    warn!("Runtime is not accepting promotions");
                }
                AdoptOutcome {
                    response: AdoptResponse::accepted("Controller handoff started"),
                    transition: Some(target),
                }
            }
        }
    }
}

impl Message<JoinFinished> for FlockNode {
    type Reply = ();

    async fn handle(&mut self, msg: JoinFinished, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if self.mode != FlockMode::Agent {
            debug!(mode = %self.mode, "Ignoring join result outside agent mode");
            return;
        }

        match msg.result {
            Ok(()) => {
                info!(
                    node_id = %self.identity.id,
                    controller_url = %msg.controller_url,
                    "Joined cluster"
                );
            }
            Err(error) => {
                events::join_failed(&self.identity.id, &msg.controller_url, &error);
                self.controller_address = None;
                self.transition(FlockMode::Pending, "join failed");
                if let Err(e) = self.advertise_pending() {
                    warn!(error = %e, "Failed to resume pending advertisement");
                }
            }
        }
    }
}

impl Message<Withdraw> for FlockNode {
    type Reply = ();

    async fn handle(&mut self, _msg: Withdraw, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.withdraw_advert().await;
    }
}

impl Message<GetStatus> for FlockNode {
    type Reply = NodeStatus;

    async fn handle(&mut self, _msg: GetStatus, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        NodeStatus {
            node_id: self.identity.id.clone(),
            listen_port: self.identity.listen_port,
            mode: self.mode,
            advertising: self.advert.is_some(),
            controller_address: self.controller_address.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::ControlPlaneError;
    use crate::discovery::MemoryNetwork;
    use async_trait::async_trait;
    use flock_core::AdoptRequest;
    use kameo::actor::ActorRef;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeControlPlane {
        fail_join: bool,
        joins: AtomicUsize,
    }

    #[async_trait]
    impl ControlPlane for FakeControlPlane {
        async fn verify_prerequisites(&self, _role: Role) -> Result<(), ControlPlaneError> {
            Ok(())
        }

        async fn start_as_controller(&self, _timeout: Duration) -> Result<(), ControlPlaneError> {
            Ok(())
        }

        async fn join_as_agent(&self, _url: &str, _token: &str) -> Result<(), ControlPlaneError> {
            self.joins.fetch_add(1, Ordering::SeqCst);
            if self.fail_join {
                return Err(ControlPlaneError::NotInstalled("k3s".to_string()));
            }
            Ok(())
        }
    }

    struct Harness {
        node: ActorRef<FlockNode>,
        control_plane: Arc<FakeControlPlane>,
        promotions: mpsc::UnboundedReceiver<Promotion>,
    }

    fn spawn_node(fail_join: bool) -> Harness {
        let network = MemoryNetwork::new();
        let discovery = DiscoveryEngine::new(
            Arc::new(network.endpoint("10.0.0.5".parse().unwrap())),
            Duration::from_millis(50),
            Duration::from_secs(15),
        );
        let control_plane = Arc::new(FakeControlPlane {
            fail_join,
            ..Default::default()
        });
        let (promotions_tx, promotions) = mpsc::unbounded_channel();
        let node = FlockNode::spawn(FlockNode::new(
            NodeIdentity::new("n1", 9000),
            discovery,
            BTreeMap::new(),
            control_plane.clone(),
            6443,
            promotions_tx,
        ));
        Harness {
            node,
            control_plane,
            promotions,
        }
    }

    fn adopt(role: Role) -> AdoptNode {
        AdoptNode {
            request: AdoptRequest {
                cluster_token: "token".to_string(),
                controller_address: "10.0.0.1".to_string(),
                role,
                bootstrap_secret: None,
            },
            peer: "10.0.0.1:50000".parse().unwrap(),
        }
    }

    async fn status(node: &ActorRef<FlockNode>) -> NodeStatus {
        node.ask(GetStatus).send().await.unwrap()
    }

    #[tokio::test]
    async fn test_entering_pending_is_not_a_transition() {
        use crate::observability::metrics::tests::{counter_total, gauge_value};
        use metrics_util::debugging::DebuggingRecorder;

        // Current-thread runtime: the actor handles messages on this thread
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let _guard = ::metrics::set_default_local_recorder(&recorder);

        let h = spawn_node(false);
        h.node.ask(EnterPending).send().await.unwrap();
        assert_eq!(gauge_value(&snapshotter, "flock_mode"), Some(0.0));
        assert_eq!(counter_total(&snapshotter, "flock_mode_transitions_total"), 0);

        h.node.ask(adopt(Role::Agent)).send().await.unwrap();
        assert_eq!(gauge_value(&snapshotter, "flock_mode"), Some(2.0));
        assert!(counter_total(&snapshotter, "flock_mode_transitions_total") >= 1);
    }

    #[tokio::test]
    async fn test_adopt_moves_pending_to_agent() {
        let h = spawn_node(false);
        h.node.ask(EnterPending).send().await.unwrap();
        assert!(status(&h.node).await.advertising);

        let outcome = h.node.ask(adopt(Role::Agent)).send().await.unwrap();
        assert!(outcome.response.accepted);
        assert_eq!(outcome.transition, Some(FlockMode::Agent));

        let s = status(&h.node).await;
        assert_eq!(s.mode, FlockMode::Agent);
        assert!(!s.advertising);
        assert_eq!(s.controller_address.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_second_adopt_is_rejected_without_mutation() {
        let h = spawn_node(false);
        h.node.ask(EnterPending).send().await.unwrap();

        assert!(h.node.ask(adopt(Role::Agent)).send().await.unwrap().response.accepted);

        let second = h.node.ask(adopt(Role::Controller)).send().await.unwrap();
        assert!(!second.response.accepted);
        assert!(second.transition.is_none());
        assert!(second.response.message.contains("already agent"));
        assert_eq!(status(&h.node).await.mode, FlockMode::Agent);
    }

    #[tokio::test]
    async fn test_concurrent_adopts_admit_exactly_one() {
        let h = spawn_node(false);
        h.node.ask(EnterPending).send().await.unwrap();

        let attempts = (0..16).map(|_| {
            let node = h.node.clone();
            async move { node.ask(adopt(Role::Agent)).send().await.unwrap() }
        });
        let outcomes = futures::future::join_all(attempts).await;

        let accepted = outcomes.iter().filter(|o| o.response.accepted).count();
        assert_eq!(accepted, 1);
        assert_eq!(
            outcomes.iter().filter(|o| o.transition.is_some()).count(),
            1
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.control_plane.joins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_join_returns_to_pending() {
        let h = spawn_node(true);
        h.node.ask(EnterPending).send().await.unwrap();

        assert!(h.node.ask(adopt(Role::Agent)).send().await.unwrap().response.accepted);

        let mut s = status(&h.node).await;
        for _ in 0..50 {
            if s.mode == FlockMode::Pending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            s = status(&h.node).await;
        }
        assert_eq!(s.mode, FlockMode::Pending);
        assert!(s.advertising);
        assert!(s.controller_address.is_none());

        // Adoptable again
        assert!(h.node.ask(adopt(Role::Agent)).send().await.unwrap().response.accepted);
    }

    #[tokio::test]
    async fn test_controller_role_requests_promotion() {
        let mut h = spawn_node(false);
        h.node.ask(EnterPending).send().await.unwrap();

        let outcome = h.node.ask(adopt(Role::Controller)).send().await.unwrap();
        assert!(outcome.response.accepted);
        assert_eq!(outcome.transition, Some(FlockMode::Controller));

        let promotion = h.promotions.recv().await.unwrap();
        assert_eq!(promotion.requested_by, "10.0.0.1:50000".parse().unwrap());
        assert_eq!(h.control_plane.joins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_become_controller_only_from_pending() {
        let h = spawn_node(false);
        h.node.ask(BecomeController).send().await.unwrap();
        assert_eq!(status(&h.node).await.mode, FlockMode::Controller);

        assert!(h.node.ask(BecomeController).send().await.is_err());
        assert!(h.node.ask(EnterPending).send().await.is_err());

        let outcome = h.node.ask(adopt(Role::Agent)).send().await.unwrap();
        assert!(!outcome.response.accepted);
    }
}
