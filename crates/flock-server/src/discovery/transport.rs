//! Discovery Transports
//!
//! `MdnsTransport` publishes presence records as DNS-SD services over
//! multicast DNS: the record kind picks the service type, the node id is the
//! instance name and metadata travels as TXT properties. `MemoryTransport`
//! connects endpoints inside one process through a broadcast channel, each
//! endpoint stamping its own source address.

use super::error::{DiscoveryError, MAX_INSTANCE_LABEL};
use crate::version::BEACON_PROTOCOL;
use async_trait::async_trait;
use flock_core::{PresenceRecord, ServiceKind};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Sightings buffered per subscriber before it starts lagging.
const SUBSCRIBER_CAPACITY: usize = 256;

/// TXT key carrying the protocol identifier.
const PROTOCOL_KEY: &str = "proto";

/// Something a transport saw on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sighting {
    Announced {
        record: PresenceRecord,
        /// Addresses the record resolved to
        addresses: Vec<IpAddr>,
        /// Lifetime the announcer asked for; `None` when the transport
        /// reports expiry itself as `Withdrawn`
        ttl: Option<Duration>,
    },
    Withdrawn {
        kind: ServiceKind,
        node_id: String,
    },
}

#[async_trait]
pub trait BeaconTransport: Send + Sync {
    /// Publish `record`, or refresh it if already published.
    async fn announce(&self, record: &PresenceRecord, ttl: Duration) -> Result<(), DiscoveryError>;

    /// Withdraw a published record.
    async fn goodbye(&self, record: &PresenceRecord) -> Result<(), DiscoveryError>;

    /// Receive every sighting from now on.
    fn subscribe(&self) -> broadcast::Receiver<Sighting>;
}

/// DNS-SD service type for a record kind.
pub fn service_type(kind: ServiceKind) -> &'static str {
    match kind {
        ServiceKind::Controller => "_flock-ctrl._tcp.local.",
        ServiceKind::Pending => "_flock-pending._tcp.local.",
    }
}

/// Reject records that cannot be published as a DNS-SD instance.
pub fn check_record(record: &PresenceRecord) -> Result<(), DiscoveryError> {
    if record.node_id.is_empty() {
        return Err(DiscoveryError::InvalidRecord("empty node id".to_string()));
    }
    if record.node_id.len() > MAX_INSTANCE_LABEL {
        return Err(DiscoveryError::InvalidRecord(format!(
            "node id {:?} longer than {MAX_INSTANCE_LABEL} bytes",
            record.node_id
        )));
    }
    Ok(())
}

fn full_name(kind: ServiceKind, node_id: &str) -> String {
    format!("{node_id}.{}", service_type(kind))
}

/// Node id of an instance full name, if it belongs to `kind`.
fn instance_name(fullname: &str, kind: ServiceKind) -> Option<String> {
    fullname
        .strip_suffix(service_type(kind))
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn txt_properties(record: &PresenceRecord, protocol: &str) -> HashMap<String, String> {
    let mut properties: HashMap<String, String> = record
        .metadata
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    properties.insert(PROTOCOL_KEY.to_string(), protocol.to_string());
    properties
}

/// Rebuild a record from resolved TXT properties. Foreign protocols yield `None`.
fn record_from_txt<'a>(
    kind: ServiceKind,
    node_id: String,
    port: u16,
    properties: impl IntoIterator<Item = (&'a str, &'a str)>,
    protocol: &str,
) -> Option<PresenceRecord> {
    let mut metadata = BTreeMap::new();
    let mut announced_protocol = None;
    for (key, value) in properties {
        if key == PROTOCOL_KEY {
            announced_protocol = Some(value);
        } else {
            metadata.insert(key.to_string(), value.to_string());
        }
    }

    if announced_protocol != Some(protocol) {
        trace!(
            node_id = %node_id,
            protocol = ?announced_protocol,
            "Ignoring service from foreign protocol"
        );
        return None;
    }

    Some(PresenceRecord {
        service_kind: kind,
        node_id,
        port,
        metadata,
    })
}

fn sighting_from_event(kind: ServiceKind, event: ServiceEvent, protocol: &str) -> Option<Sighting> {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let node_id = instance_name(info.get_fullname(), kind)?;
            let properties = info
                .get_properties()
                .iter()
                .map(|property| (property.key(), property.val_str()));
            let record = record_from_txt(kind, node_id, info.get_port(), properties, protocol)?;

            let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
            addresses.sort_by_key(|addr| (addr.is_ipv6(), *addr));
            Some(Sighting::Announced {
                record,
                addresses,
                ttl: None,
            })
        }
        ServiceEvent::ServiceRemoved(_, fullname) => {
            let node_id = instance_name(&fullname, kind)?;
            Some(Sighting::Withdrawn { kind, node_id })
        }
        _ => None,
    }
}

/// Multicast DNS transport.
pub struct MdnsTransport {
    daemon: ServiceDaemon,
    protocol: String,
    /// Published records by instance full name
    registered: Mutex<HashMap<String, PresenceRecord>>,
    sightings: broadcast::Sender<Sighting>,
    browsers: Vec<JoinHandle<()>>,
}

impl MdnsTransport {
    /// Start an mDNS responder browsing both flock service types.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()?;
        let protocol = BEACON_PROTOCOL.to_string();
        let (sightings, _) = broadcast::channel(SUBSCRIBER_CAPACITY);

        let mut browsers = Vec::new();
        for kind in [ServiceKind::Controller, ServiceKind::Pending] {
            let receiver = daemon.browse(service_type(kind))?;
            let protocol = protocol.clone();
            let sightings = sightings.clone();
            browsers.push(tokio::spawn(async move {
                while let Ok(event) = receiver.recv_async().await {
                    if let Some(sighting) = sighting_from_event(kind, event, &protocol) {
                        // No subscribers is fine
                        let _ = sightings.send(sighting);
                    }
                }
                debug!(kind = %kind, "mDNS browse ended");
            }));
        }

        debug!(protocol = %protocol, "mDNS responder started");

        Ok(Self {
            daemon,
            protocol,
            registered: Mutex::new(HashMap::new()),
            sightings,
            browsers,
        })
    }
}

impl Drop for MdnsTransport {
    fn drop(&mut self) {
        for browser in &self.browsers {
            browser.abort();
        }
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "mDNS daemon already stopped");
        }
    }
}

#[async_trait]
impl BeaconTransport for MdnsTransport {
    /// The responder re-announces and answers queries itself, so this only
    /// registers when the record is new or changed.
    async fn announce(&self, record: &PresenceRecord, _ttl: Duration) -> Result<(), DiscoveryError> {
        check_record(record)?;
        let fullname = full_name(record.service_kind, &record.node_id);

        let mut registered = self.registered.lock().await;
        if registered.get(&fullname) == Some(record) {
            return Ok(());
        }

        let info = ServiceInfo::new(
            service_type(record.service_kind),
            &record.node_id,
            &format!("{}.local.", record.node_id),
            "",
            record.port,
            txt_properties(record, &self.protocol),
        )?
        .enable_addr_auto();
        self.daemon.register(info)?;
        registered.insert(fullname, record.clone());

        debug!(node_id = %record.node_id, kind = %record.service_kind, "Registered mDNS service");
        Ok(())
    }

    async fn goodbye(&self, record: &PresenceRecord) -> Result<(), DiscoveryError> {
        let fullname = full_name(record.service_kind, &record.node_id);
        if self.registered.lock().await.remove(&fullname).is_none() {
            return Ok(());
        }
        self.daemon.unregister(&fullname)?;
        debug!(node_id = %record.node_id, kind = %record.service_kind, "Unregistered mDNS service");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Sighting> {
        self.sightings.subscribe()
    }
}

/// Shared in-process segment that `MemoryTransport` endpoints attach to.
#[derive(Clone)]
pub struct MemoryNetwork {
    sightings: broadcast::Sender<Sighting>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        let (sightings, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self { sightings }
    }

    /// Attach an endpoint whose announcements resolve to `source`.
    pub fn endpoint(&self, source: IpAddr) -> MemoryTransport {
        MemoryTransport {
            sightings: self.sightings.clone(),
            source,
        }
    }
}

/// In-process transport endpoint, used by tests and local simulations.
///
/// Every `announce` is delivered, so expiry is driven by the announced TTL.
#[derive(Clone)]
pub struct MemoryTransport {
    sightings: broadcast::Sender<Sighting>,
    source: IpAddr,
}

#[async_trait]
impl BeaconTransport for MemoryTransport {
    async fn announce(&self, record: &PresenceRecord, ttl: Duration) -> Result<(), DiscoveryError> {
        check_record(record)?;
        let _ = self.sightings.send(Sighting::Announced {
            record: record.clone(),
            addresses: vec![self.source],
            ttl: Some(ttl),
        });
        Ok(())
    }

    async fn goodbye(&self, record: &PresenceRecord) -> Result<(), DiscoveryError> {
        let _ = self.sightings.send(Sighting::Withdrawn {
            kind: record.service_kind,
            node_id: record.node_id.clone(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Sighting> {
        self.sightings.subscribe()
    }
}
