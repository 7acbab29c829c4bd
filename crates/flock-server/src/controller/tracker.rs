//! Adoption Attempt Tracking
//!
//! Discovery can report the same pending node again while an attempt is
//! still running, or right after one finished. The tracker admits at most
//! one attempt per node id at a time and spaces attempts by a cooldown.
//!
//! A node that is still advertised as pending when its cooldown runs out is
//! worth another try: its join may have failed, or it rebooted under the same
//! name. Such sightings are parked as deferred and re-checked once the
//! cooldown allows, unless the node departs first.

use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptState {
    InFlight,
    Finished { at: Instant },
}

/// Why an attempt was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    InFlight,
    CoolingDown { remaining: Duration },
}

#[derive(Debug)]
pub struct AttemptTracker {
    cooldown: Duration,
    attempts: HashMap<String, AttemptState>,
    /// Nodes currently advertised as pending
    present: HashSet<String>,
    /// Nodes with a parked re-check
    deferred: HashSet<String>,
}

impl AttemptTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            attempts: HashMap::new(),
            present: HashSet::new(),
            deferred: HashSet::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Admit an attempt for `node_id`, marking it in flight.
    pub fn try_begin(&mut self, node_id: &str, now: Instant) -> Result<(), Skip> {
        match self.attempts.get(node_id) {
            Some(AttemptState::InFlight) => return Err(Skip::InFlight),
            Some(AttemptState::Finished { at }) => {
                let elapsed = now.saturating_duration_since(*at);
                if elapsed < self.cooldown {
                    return Err(Skip::CoolingDown {
                        remaining: self.cooldown - elapsed,
                    });
                }
            }
            None => {}
        }
        self.attempts.insert(node_id.to_string(), AttemptState::InFlight);
        Ok(())
    }

    /// Record the end of an attempt started with `try_begin`, whatever its outcome.
    pub fn finish(&mut self, node_id: &str, now: Instant) {
        self.attempts
            .insert(node_id.to_string(), AttemptState::Finished { at: now });
    }

    /// Drop finished entries older than the cooldown.
    pub fn prune(&mut self, now: Instant) {
        let cooldown = self.cooldown;
        self.attempts.retain(|_, state| match state {
            AttemptState::Finished { at } => now.saturating_duration_since(*at) < cooldown,
            AttemptState::InFlight => true,
        });
    }

    pub fn in_flight(&self) -> usize {
        self.attempts
            .values()
            .filter(|state| **state == AttemptState::InFlight)
            .count()
    }

    pub fn mark_present(&mut self, node_id: &str) {
        self.present.insert(node_id.to_string());
    }

    /// The node stopped advertising; any parked re-check is dropped.
    pub fn mark_departed(&mut self, node_id: &str) {
        self.present.remove(node_id);
        self.deferred.remove(node_id);
    }

    pub fn is_present(&self, node_id: &str) -> bool {
        self.present.contains(node_id)
    }

    /// Park a re-check for `node_id`. False when one is already parked.
    pub fn defer(&mut self, node_id: &str) -> bool {
        self.deferred.insert(node_id.to_string())
    }

    pub fn is_deferred(&self, node_id: &str) -> bool {
        self.deferred.contains(node_id)
    }

    /// Give up a parked re-check.
    pub fn clear_deferred(&mut self, node_id: &str) {
        self.deferred.remove(node_id);
    }
}
