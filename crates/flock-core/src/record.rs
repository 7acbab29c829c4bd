//! Presence Records and Discovery Events

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use strum::{Display, EnumString};

/// Stable identity of the local node, fixed at process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Hostname-derived node identifier
    pub id: String,
    /// Port the adoption endpoint listens on
    pub listen_port: u16,
}

impl NodeIdentity {
    pub fn new(id: impl Into<String>, listen_port: u16) -> Self {
        Self {
            id: id.into(),
            listen_port,
        }
    }

    /// Build the presence record this node advertises for `kind`.
    pub fn presence(&self, kind: ServiceKind, metadata: BTreeMap<String, String>) -> PresenceRecord {
        PresenceRecord {
            service_kind: kind,
            node_id: self.id.clone(),
            port: self.listen_port,
            metadata,
        }
    }
}

/// Kind tag carried by every presence record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceKind {
    Controller,
    Pending,
}

/// A node's advertised presence on the local network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub service_kind: ServiceKind,
    pub node_id: String,
    pub port: u16,
    /// Opaque key/value metadata (os, cpu, mem, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PresenceRecord {
    /// Look up a metadata value, falling back to `unknown`.
    pub fn meta(&self, key: &str) -> &str {
        self.metadata.get(key).map(String::as_str).unwrap_or("unknown")
    }
}

/// Operation carried by a discovery event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DiscoveryOp {
    Added,
    Removed,
}

/// A state change observed while browsing for records of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    pub op: DiscoveryOp,
    pub record: PresenceRecord,
    /// Addresses the record was observed from, most recent first
    pub addresses: Vec<IpAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_from_identity() {
        let identity = NodeIdentity::new("n1", 9000);
        let mut metadata = BTreeMap::new();
        metadata.insert("os".to_string(), "linux".to_string());

        let record = identity.presence(ServiceKind::Pending, metadata);
        assert_eq!(record.node_id, "n1");
        assert_eq!(record.port, 9000);
        assert_eq!(record.meta("os"), "linux");
        assert_eq!(record.meta("cpu"), "unknown");
    }

    #[test]
    fn test_record_metadata_defaults_when_missing() {
        let json = r#"{"service_kind":"pending","node_id":"n2","port":9001}"#;
        let record: PresenceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.service_kind, ServiceKind::Pending);
        assert!(record.metadata.is_empty());
    }
}
