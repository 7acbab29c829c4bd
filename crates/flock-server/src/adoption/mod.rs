//! Adoption Protocol
//!
//! Request/response RPC between a controller and a node's adoption endpoint,
//! carried over TCP as length-prefixed JSON frames:
//!
//! ```text
//! +----------------------------+--------------------------+
//! | Length (4 bytes, BE)       | JSON envelope            |
//! +----------------------------+--------------------------+
//! ```
//!
//! - `server`: the endpoint every node exposes
//! - `client`: the controller side
//! - `auth`: admission of inbound claims

mod auth;
mod client;
mod codec;
mod error;
mod server;

pub use auth::{authenticator_for, Authenticator, OpenNetwork, PresharedSecret};
pub use client::AdoptionClient;
pub use codec::{decode_frame, encode_frame, frame_codec, MAX_FRAME_LENGTH};
pub use error::AdoptionError;
pub use server::{dispatch, AdoptionServer, DEFAULT_IDLE_TIMEOUT};
