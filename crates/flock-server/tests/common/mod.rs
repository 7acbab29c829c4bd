//! Shared fakes for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use flock_core::Role;
use flock_server::config::{FlockConfig, StartMode};
use flock_server::control_plane::{ControlPlane, ControlPlaneError, JoinCredential, TokenIssuer};
use flock_server::discovery::MemoryNetwork;
use flock_server::metadata::StaticMetadata;
use flock_server::node::{GetStatus, NodeStatus};
use flock_server::runtime::{Collaborators, NodeRuntime};
use flock_core::FlockMode;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CONTROLLER_IP: &str = "10.0.0.1";
pub const ISSUED_TOKEN: &str = "K10abc::server:secret";

/// Each test starts its port scan in its own range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(21000);

#[derive(Default)]
pub struct FakeControlPlane {
    pub fail_join: bool,
    pub joins: Mutex<Vec<(String, String)>>,
    pub starts: Mutex<usize>,
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn verify_prerequisites(&self, _role: Role) -> Result<(), ControlPlaneError> {
        Ok(())
    }

    async fn start_as_controller(&self, _timeout: Duration) -> Result<(), ControlPlaneError> {
        *self.starts.lock().unwrap() += 1;
        Ok(())
    }

    async fn join_as_agent(&self, controller_url: &str, token: &str) -> Result<(), ControlPlaneError> {
        self.joins
            .lock()
            .unwrap()
            .push((controller_url.to_string(), token.to_string()));
        if self.fail_join {
            return Err(ControlPlaneError::CommandFailed {
                command: "systemd-run".to_string(),
                stderr: "unit failed".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeIssuer {
    pub issued: Mutex<Vec<(String, Duration)>>,
}

#[async_trait]
impl TokenIssuer for FakeIssuer {
    async fn issue(&self, purpose: &str, ttl: Duration) -> Result<JoinCredential, ControlPlaneError> {
        self.issued.lock().unwrap().push((purpose.to_string(), ttl));
        Ok(JoinCredential {
            token: ISSUED_TOKEN.to_string(),
            ttl,
        })
    }
}

pub fn test_config(node_id: &str) -> FlockConfig {
    FlockConfig {
        node_id: Some(node_id.to_string()),
        default_port: NEXT_PORT.fetch_add(50, Ordering::SeqCst),
        no_verify: true,
        announce_interval: Duration::from_millis(50),
        record_ttl: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(1),
        request_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_millis(100),
        status_addr: None,
        ..FlockConfig::default()
    }
}

pub struct TestNode {
    pub runtime: NodeRuntime,
    pub control_plane: Arc<FakeControlPlane>,
    pub issuer: Arc<FakeIssuer>,
}

pub async fn start_node(
    network: &MemoryNetwork,
    source: &str,
    config: FlockConfig,
    mode: StartMode,
    control_plane: FakeControlPlane,
) -> TestNode {
    let control_plane = Arc::new(control_plane);
    let issuer = Arc::new(FakeIssuer::default());
    let mut metadata = BTreeMap::new();
    metadata.insert("os".to_string(), "linux".to_string());

    let source: IpAddr = source.parse().unwrap();
    let collaborators = Collaborators {
        control_plane: control_plane.clone(),
        token_issuer: issuer.clone(),
        metadata: Arc::new(StaticMetadata(metadata)),
        transport: Arc::new(network.endpoint(source)),
    };
    let runtime = NodeRuntime::start(config, mode, collaborators, None)
        .await
        .expect("node runtime starts");

    TestNode {
        runtime,
        control_plane,
        issuer,
    }
}

pub async fn status(runtime: &NodeRuntime) -> NodeStatus {
    runtime.node().ask(GetStatus).send().await.unwrap()
}

/// Poll until the node reports `mode`, or give up after a few seconds.
pub async fn wait_for_mode(runtime: &NodeRuntime, mode: FlockMode) -> NodeStatus {
    for _ in 0..200 {
        let current = status(runtime).await;
        if current.mode == mode {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    status(runtime).await
}

/// Poll `check` until it returns true, or give up after a few seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub fn adopt_request(role: Role) -> flock_core::AdoptRequest {
    flock_core::AdoptRequest {
        cluster_token: ISSUED_TOKEN.to_string(),
        controller_address: CONTROLLER_IP.to_string(),
        role,
        bootstrap_secret: None,
    }
}
