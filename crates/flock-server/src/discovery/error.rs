//! Discovery Errors

use thiserror::Error;

/// Longest node id usable as a DNS-SD instance label.
pub const MAX_INSTANCE_LABEL: usize = 63;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("mDNS daemon error: {0}")]
    Mdns(#[from] mdns_sd::Error),
    #[error("invalid presence record: {0}")]
    InvalidRecord(String),
}
