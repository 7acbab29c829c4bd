//! Node Metadata
//!
//! A flat key/value description of the host carried in pending
//! announcements so an operator watching the controller can tell candidates
//! apart. Every lookup is best effort and degrades to `unknown`.

mod system;
mod vendor;

pub use system::{hostname, SystemMetadata};
pub use vendor::lookup_vendor;

use std::collections::BTreeMap;

/// Placeholder for facts that could not be collected.
pub const UNKNOWN: &str = "unknown";

pub trait MetadataCollector: Send + Sync {
    fn collect(&self) -> BTreeMap<String, String>;
}

/// Fixed metadata, for tests and hosts where probing is undesirable.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadata(pub BTreeMap<String, String>);

impl MetadataCollector for StaticMetadata {
    fn collect(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}
