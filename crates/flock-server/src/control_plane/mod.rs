//! Cluster Control Plane
//!
//! The flock core never talks to k3s directly. It starts, joins and mints
//! credentials through these two traits; `k3s` holds the production
//! implementations that shell out to `k3s`, `systemctl` and `systemd-run`.

mod k3s;

pub use k3s::{control_plane_url, K3s, K3sTokenIssuer, UnitState};

use async_trait::async_trait;
use flock_core::Role;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("{0} not found in PATH")]
    NotInstalled(String),
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("control plane did not become active within {0:?}")]
    Timeout(Duration),
    #[error("service {unit} failed: {detail}")]
    ServiceFailed { unit: String, detail: String },
    #[error("token issuer returned an empty token")]
    EmptyToken,
    #[error("prerequisite check failed: {0}")]
    Prerequisite(String),
}

/// Lifecycle operations on the local control-plane process.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Check the host can take on `role`. Run once before entering a mode.
    async fn verify_prerequisites(&self, role: Role) -> Result<(), ControlPlaneError>;

    /// Start the control-plane server and wait until it is active.
    async fn start_as_controller(&self, timeout: Duration) -> Result<(), ControlPlaneError>;

    /// Join the cluster served at `controller_url` using `token`.
    async fn join_as_agent(&self, controller_url: &str, token: &str)
        -> Result<(), ControlPlaneError>;
}

/// A time-bounded join credential.
#[derive(Clone)]
pub struct JoinCredential {
    pub token: String,
    pub ttl: Duration,
}

impl fmt::Debug for JoinCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinCredential")
            .field("token", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Mints join credentials on the controller.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, purpose: &str, ttl: Duration) -> Result<JoinCredential, ControlPlaneError>;
}
