//! Core shared types for compute-flock
//!
//! This crate contains the domain and wire types shared by every flock node:
//! the lifecycle mode, presence records published through local discovery,
//! and the request/response messages of the adoption protocol.

mod mode;
mod record;
mod rpc;

pub use mode::{FlockMode, Role};
pub use record::{DiscoveryEvent, DiscoveryOp, NodeIdentity, PresenceRecord, ServiceKind};
pub use rpc::{
    AdoptRequest, AdoptResponse, HeartbeatRequest, HeartbeatResponse, RpcRequest, RpcResponse,
};

/// Preferred port for the adoption endpoint.
pub const DEFAULT_PORT: u16 = 9000;

/// Highest port the allocator will consider.
pub const MAX_PORT: u16 = 32767;

/// Port the k3s API server listens on.
pub const CONTROL_PLANE_PORT: u16 = 6443;
