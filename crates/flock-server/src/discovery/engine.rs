//! Discovery Engine
//!
//! Owns the advertise and browse loops. Each advertised record gets its own
//! announce task; each browse gets its own receive task that tracks the
//! records it has surfaced so re-announcements stay silent.

use super::error::DiscoveryError;
use super::transport::{check_record, BeaconTransport, Sighting};
use crate::observability::metrics;
use flock_core::{DiscoveryEvent, DiscoveryOp, PresenceRecord, ServiceKind};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// How often a browser checks its records for expiry.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Advertise/browse front end over a discovery transport.
#[derive(Clone)]
pub struct DiscoveryEngine {
    transport: Arc<dyn BeaconTransport>,
    announce_interval: Duration,
    record_ttl: Duration,
}

impl DiscoveryEngine {
    pub fn new(
        transport: Arc<dyn BeaconTransport>,
        announce_interval: Duration,
        record_ttl: Duration,
    ) -> Self {
        Self {
            transport,
            announce_interval,
            record_ttl,
        }
    }

    /// Start announcing `record` until the returned handle is withdrawn or dropped.
    pub fn advertise(&self, record: PresenceRecord) -> Result<AdvertiseHandle, DiscoveryError> {
        check_record(&record)?;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let transport = self.transport.clone();
        let interval = self.announce_interval;
        let ttl = self.record_ttl;
        let announced = record.clone();
        let node_id = record.node_id.clone();
        let kind = record.service_kind;

        debug!(node_id = %node_id, kind = %kind, "Advertising presence");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    // Fires on an explicit stop and when the handle is dropped
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = transport.announce(&announced, ttl).await {
                            warn!(node_id = %node_id, error = %e, "Failed to send announcement");
                        }
                    }
                }
            }

            if let Err(e) = transport.goodbye(&announced).await {
                warn!(node_id = %node_id, error = %e, "Failed to send goodbye");
            }
            debug!(node_id = %node_id, kind = %kind, "Presence withdrawn");
        });

        Ok(AdvertiseHandle {
            record,
            stop_tx: Some(stop_tx),
            task: Some(task),
        })
    }

    /// Surface records of `kind` seen on the network as events on `events`.
    ///
    /// Records advertised under `local_node_id` are never surfaced. The browse
    /// runs until the handle is stopped or dropped, or `events` is closed.
    pub fn browse(
        &self,
        kind: ServiceKind,
        local_node_id: impl Into<String>,
        events: mpsc::Sender<DiscoveryEvent>,
    ) -> BrowseHandle {
        // Subscribe before spawning so nothing sent after this call is missed
        let mut sightings = self.transport.subscribe();
        let mut state = BrowseState::new(kind, local_node_id);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        debug!(kind = %kind, "Browsing for presence records");

        let task = tokio::spawn(async move {
            let mut sweep = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let pending: Vec<DiscoveryEvent> = tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    received = sightings.recv() => match received {
                        Ok(sighting) => state.observe(&sighting, Instant::now()).into_iter().collect(),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(kind = %kind, skipped = skipped, "Browser lagging, sightings dropped");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = sweep.tick() => state.expire(Instant::now()),
                };

                for event in pending {
                    metrics::record_discovery_event(event.op);
                    if events.send(event).await.is_err() {
                        debug!(kind = %kind, "Event receiver closed, stopping browse");
                        return;
                    }
                }
            }
            debug!(kind = %kind, "Browse stopped");
        });

        BrowseHandle {
            stop_tx: Some(stop_tx),
            task,
        }
    }
}

/// A live advertisement. Dropping it also withdraws the record.
pub struct AdvertiseHandle {
    record: PresenceRecord,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AdvertiseHandle {
    pub fn record(&self) -> &PresenceRecord {
        &self.record
    }

    /// Stop announcing and wait until the goodbye has been sent.
    pub async fn withdraw(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Advertise task ended abnormally");
            }
        }
    }
}

/// A live browse registration. Dropping it stops the browse.
pub struct BrowseHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl BrowseHandle {
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let _ = (&mut self.task).await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[derive(Debug, Clone)]
struct Observed {
    record: PresenceRecord,
    addresses: Vec<IpAddr>,
    /// `None` when the transport reports expiry itself
    expires_at: Option<Instant>,
}

/// Record bookkeeping for one browse, independent of any I/O.
#[derive(Debug)]
pub struct BrowseState {
    kind: ServiceKind,
    local_node_id: String,
    known: HashMap<String, Observed>,
}

impl BrowseState {
    pub fn new(kind: ServiceKind, local_node_id: impl Into<String>) -> Self {
        Self {
            kind,
            local_node_id: local_node_id.into(),
            known: HashMap::new(),
        }
    }

    /// Number of records currently considered present.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Fold one sighting into the state, returning the event it causes, if any.
    pub fn observe(&mut self, sighting: &Sighting, now: Instant) -> Option<DiscoveryEvent> {
        match sighting {
            Sighting::Withdrawn { kind, node_id } => {
                if *kind != self.kind {
                    return None;
                }
                let observed = self.known.remove(node_id)?;
                Some(DiscoveryEvent {
                    op: DiscoveryOp::Removed,
                    record: observed.record,
                    addresses: observed.addresses,
                })
            }
            Sighting::Announced {
                record,
                addresses,
                ttl,
            } => {
                if record.service_kind != self.kind || record.node_id == self.local_node_id {
                    return None;
                }
                let expires_at = ttl.map(|ttl| now + ttl);

                match self.known.get_mut(&record.node_id) {
                    Some(observed) => {
                        // Re-announcement: refresh silently
                        observed.expires_at = expires_at;
                        observed.record = record.clone();
                        for addr in addresses.iter().rev() {
                            observed.addresses.retain(|known| known != addr);
                            observed.addresses.insert(0, *addr);
                        }
                        None
                    }
                    None => {
                        let observed = Observed {
                            record: record.clone(),
                            addresses: addresses.clone(),
                            expires_at,
                        };
                        let event = DiscoveryEvent {
                            op: DiscoveryOp::Added,
                            record: observed.record.clone(),
                            addresses: observed.addresses.clone(),
                        };
                        self.known.insert(record.node_id.clone(), observed);
                        Some(event)
                    }
                }
            }
        }
    }

    /// Drop records whose TTL has lapsed, returning a `Removed` event for each.
    pub fn expire(&mut self, now: Instant) -> Vec<DiscoveryEvent> {
        let expired: Vec<String> = self
            .known
            .iter()
            .filter(|(_, observed)| observed.expires_at.is_some_and(|at| at <= now))
            .map(|(node_id, _)| node_id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|node_id| self.known.remove(&node_id))
            .map(|observed| DiscoveryEvent {
                op: DiscoveryOp::Removed,
                record: observed.record,
                addresses: observed.addresses,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MemoryNetwork;
    use std::collections::BTreeMap;

    fn record(kind: ServiceKind, node_id: &str) -> PresenceRecord {
        PresenceRecord {
            service_kind: kind,
            node_id: node_id.to_string(),
            port: 9000,
            metadata: BTreeMap::new(),
        }
    }

    fn announced(kind: ServiceKind, node_id: &str, source: &str, ttl: Option<Duration>) -> Sighting {
        Sighting::Announced {
            record: record(kind, node_id),
            addresses: vec![source.parse().unwrap()],
            ttl,
        }
    }

    fn withdrawn(node_id: &str) -> Sighting {
        Sighting::Withdrawn {
            kind: ServiceKind::Pending,
            node_id: node_id.to_string(),
        }
    }

    const TTL: Option<Duration> = Some(Duration::from_secs(15));

    #[test]
    fn test_first_announcement_is_added_repeats_are_silent() {
        let mut state = BrowseState::new(ServiceKind::Pending, "ctrl");
        let now = Instant::now();
        let hello = announced(ServiceKind::Pending, "n1", "10.0.0.5", TTL);

        let event = state.observe(&hello, now).unwrap();
        assert_eq!(event.op, DiscoveryOp::Added);
        assert_eq!(event.record.node_id, "n1");
        assert_eq!(event.addresses, vec!["10.0.0.5".parse::<IpAddr>().unwrap()]);

        assert!(state.observe(&hello, now).is_none());
        assert!(state.observe(&hello, now + Duration::from_secs(5)).is_none());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_own_record_is_never_surfaced() {
        let mut state = BrowseState::new(ServiceKind::Pending, "self");
        let hello = announced(ServiceKind::Pending, "self", "10.0.0.1", TTL);
        assert!(state.observe(&hello, Instant::now()).is_none());
        assert!(state.is_empty());
    }

    #[test]
    fn test_other_kinds_are_ignored() {
        let mut state = BrowseState::new(ServiceKind::Pending, "self");
        let hello = announced(ServiceKind::Controller, "c2", "10.0.0.9", TTL);
        assert!(state.observe(&hello, Instant::now()).is_none());

        let bye = Sighting::Withdrawn {
            kind: ServiceKind::Controller,
            node_id: "c2".to_string(),
        };
        assert!(state.observe(&bye, Instant::now()).is_none());
    }

    #[test]
    fn test_goodbye_removes_known_record_only() {
        let mut state = BrowseState::new(ServiceKind::Pending, "ctrl");
        let now = Instant::now();

        assert!(state.observe(&withdrawn("n1"), now).is_none());

        state.observe(&announced(ServiceKind::Pending, "n1", "10.0.0.5", TTL), now);
        let event = state.observe(&withdrawn("n1"), now).unwrap();
        assert_eq!(event.op, DiscoveryOp::Removed);
        assert_eq!(event.addresses, vec!["10.0.0.5".parse::<IpAddr>().unwrap()]);
        assert!(state.is_empty());
    }

    #[test]
    fn test_expiry_emits_removed() {
        let mut state = BrowseState::new(ServiceKind::Pending, "ctrl");
        let now = Instant::now();
        let hello = announced(ServiceKind::Pending, "n1", "10.0.0.5", Some(Duration::from_secs(2)));
        state.observe(&hello, now);

        assert!(state.expire(now + Duration::from_secs(1)).is_empty());

        let removed = state.expire(now + Duration::from_secs(3));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].op, DiscoveryOp::Removed);
        assert_eq!(removed[0].record.node_id, "n1");
    }

    #[test]
    fn test_records_without_ttl_wait_for_withdrawal() {
        let mut state = BrowseState::new(ServiceKind::Pending, "ctrl");
        let now = Instant::now();
        state.observe(&announced(ServiceKind::Pending, "n1", "10.0.0.5", None), now);

        assert!(state.expire(now + Duration::from_secs(3600)).is_empty());
        assert_eq!(state.len(), 1);
        assert!(state.observe(&withdrawn("n1"), now).is_some());
    }

    #[test]
    fn test_new_source_address_moves_to_front() {
        let mut state = BrowseState::new(ServiceKind::Pending, "ctrl");
        let now = Instant::now();
        state.observe(&announced(ServiceKind::Pending, "n1", "10.0.0.5", TTL), now);
        state.observe(&announced(ServiceKind::Pending, "n1", "192.168.1.5", TTL), now);

        let removed = state.expire(now + Duration::from_secs(60));
        assert_eq!(
            removed[0].addresses,
            vec![
                "192.168.1.5".parse::<IpAddr>().unwrap(),
                "10.0.0.5".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn test_withdrawn_record_not_seen_by_fresh_browse() {
        let network = MemoryNetwork::new();
        let node = DiscoveryEngine::new(
            Arc::new(network.endpoint("10.0.0.5".parse().unwrap())),
            Duration::from_millis(50),
            Duration::from_secs(15),
        );
        let controller = DiscoveryEngine::new(
            Arc::new(network.endpoint("10.0.0.1".parse().unwrap())),
            Duration::from_millis(50),
            Duration::from_secs(15),
        );

        let advert = node.advertise(record(ServiceKind::Pending, "n1")).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        advert.withdraw().await;

        let (tx, mut rx) = mpsc::channel(8);
        let browse = controller.browse(ServiceKind::Pending, "ctrl", tx);

        let seen = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(seen.is_err(), "withdrawn record surfaced: {seen:?}");
        browse.stop().await;
    }

    #[tokio::test]
    async fn test_browse_sees_added_then_removed_on_withdraw() {
        let network = MemoryNetwork::new();
        let node = DiscoveryEngine::new(
            Arc::new(network.endpoint("10.0.0.5".parse().unwrap())),
            Duration::from_millis(50),
            Duration::from_secs(15),
        );
        let controller = DiscoveryEngine::new(
            Arc::new(network.endpoint("10.0.0.1".parse().unwrap())),
            Duration::from_millis(50),
            Duration::from_secs(15),
        );

        let (tx, mut rx) = mpsc::channel(8);
        let browse = controller.browse(ServiceKind::Pending, "ctrl", tx);
        let advert = node.advertise(record(ServiceKind::Pending, "n1")).unwrap();

        let added = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(added.op, DiscoveryOp::Added);
        assert_eq!(added.addresses, vec!["10.0.0.5".parse::<IpAddr>().unwrap()]);

        // Several re-announcements pass before the withdraw
        tokio::time::sleep(Duration::from_millis(200)).await;
        advert.withdraw().await;

        let removed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removed.op, DiscoveryOp::Removed);
        assert_eq!(removed.record.node_id, "n1");

        browse.stop().await;
    }

    #[tokio::test]
    async fn test_dropped_advert_sends_goodbye() {
        let network = MemoryNetwork::new();
        let engine = DiscoveryEngine::new(
            Arc::new(network.endpoint("10.0.0.5".parse().unwrap())),
            Duration::from_secs(60),
            Duration::from_secs(120),
        );
        let mut rx = network.endpoint("10.0.0.1".parse().unwrap()).subscribe();

        let advert = engine.advertise(record(ServiceKind::Pending, "n1")).unwrap();
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Sighting::Announced { .. }));

        drop(advert);
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, withdrawn("n1"));
    }

    #[test]
    fn test_advertise_rejects_empty_node_id() {
        let network = MemoryNetwork::new();
        let engine = DiscoveryEngine::new(
            Arc::new(network.endpoint("10.0.0.5".parse().unwrap())),
            Duration::from_secs(1),
            Duration::from_secs(15),
        );
        assert!(matches!(
            engine.advertise(record(ServiceKind::Pending, "")),
            Err(DiscoveryError::InvalidRecord(_))
        ));
    }
}
