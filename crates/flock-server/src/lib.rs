//! Compute Flock Server Library
//!
//! Zero-configuration clustering for machines on one local network: nodes
//! announce themselves as pending, a controller discovers and adopts them
//! into its k3s cluster.

pub mod adoption;
pub mod api;
pub mod config;
pub mod control_plane;
pub mod controller;
pub mod discovery;
pub mod metadata;
pub mod net;
pub mod node;
pub mod observability;
pub mod runtime;
pub mod version;
