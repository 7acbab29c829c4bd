//! Node State Machine
//!
//! `FlockNode` is the single owner of the node's [`FlockMode`]. Every read
//! and transition goes through its mailbox, so concurrent adoption requests
//! are serialized and at most one of them moves the node out of `Pending`.
//!
//! ```text
//!            EnterPending                 AdoptNode(agent)
//!   (boot) ───────────────► Pending ─────────────────────► Agent
//!                            │  ▲                            │
//!            BecomeController│  └──── JoinFinished(Err) ─────┘
//!            AdoptNode(ctrl) ▼
//!                        Controller
//! ```
//!
//! [`FlockMode`]: flock_core::FlockMode

mod actor;
mod messages;

pub use actor::{FlockNode, Promotion};
pub use messages::{
    AdoptNode, AdoptOutcome, BecomeController, EnterPending, GetStatus, JoinFinished, NodeError,
    NodeStatus, Withdraw,
};
