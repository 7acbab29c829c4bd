//! Host Networking Helpers
//!
//! Port selection for the adoption endpoint and resolution of the address
//! this node is reachable at.

mod local_ip;
mod port;

pub use local_ip::{current_local_ip, resolve_self_ip};
pub use port::{bind_open_port, find_open_port, find_open_port_in};
