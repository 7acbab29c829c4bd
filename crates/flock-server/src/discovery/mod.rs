//! Local-Network Discovery
//!
//! Nodes publish presence records as DNS-SD services over multicast DNS;
//! browsers turn what the transport sees into `Added`/`Removed` events for
//! one record kind.
//!
//! ```text
//!   advertise(record) ──► announce every interval ──► goodbye on withdraw
//!                                   │
//!                   BeaconTransport (mDNS, or in-memory)
//!                                   │
//!   browse(kind) ◄── dedupe, self-filter, TTL expiry ◄──┘
//! ```

mod engine;
mod error;
mod transport;

pub use engine::{AdvertiseHandle, BrowseHandle, BrowseState, DiscoveryEngine};
pub use error::{DiscoveryError, MAX_INSTANCE_LABEL};
pub use transport::{
    check_record, service_type, BeaconTransport, MdnsTransport, MemoryNetwork, MemoryTransport,
    Sighting,
};
