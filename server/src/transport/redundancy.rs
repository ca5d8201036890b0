//! Redundancy Manager: groups peers by RTT, selects the primary path, and
//! triggers failover on repeated send failures.
//!
//! Plain struct-plus-`HashMap` bookkeeping, no actor or ECS machinery —
//! peers are looked up and mutated directly by id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Consecutive send failures to the current primary before failover fires.
pub const FAILOVER_THRESHOLD: u32 = 5;
/// Cadence at which a degraded peer is re-probed for recovery.
pub const REPROBE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RttGroup {
    LowLatency,
    Secondary,
}

#[derive(Debug, Clone)]
struct PeerInfo {
    addr: String,
    rtt_millis: f64,
    group: RttGroup,
    consecutive_failures: u32,
    degraded: bool,
    last_probe: Instant,
}

/// Tracks known peers and the currently-selected primary path.
pub struct RedundancyManager {
    peers: HashMap<String, PeerInfo>,
    primary: Option<String>,
    group_rtt_threshold_ms: u64,
}

impl RedundancyManager {
    pub fn new(group_rtt_threshold_ms: u64) -> Self {
        Self {
            peers: HashMap::new(),
            primary: None,
            group_rtt_threshold_ms,
        }
    }

    /// Registers (or updates) a peer's measured RTT, regrouping it and
    /// reselecting the primary path if this changes the best candidate.
    pub fn observe_rtt(&mut self, peer_id: &str, addr: &str, rtt_millis: f64, now: Instant) {
        let group = if (rtt_millis as u64) < self.group_rtt_threshold_ms {
            RttGroup::LowLatency
        } else {
            RttGroup::Secondary
        };

        let entry = self
            .peers
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerInfo {
                addr: addr.to_string(),
                rtt_millis,
                group,
                consecutive_failures: 0,
                degraded: false,
                last_probe: now,
            });
        entry.addr = addr.to_string();
        entry.rtt_millis = rtt_millis;
        entry.group = group;
        entry.last_probe = now;
        if group == RttGroup::LowLatency && entry.degraded && rtt_millis < self.group_rtt_threshold_ms as f64
        {
            entry.degraded = false;
            entry.consecutive_failures = 0;
        }

        self.select_primary();
    }

    /// Updates an already-registered peer's RTT in place, reusing its known
    /// address. No-op if `peer_id` was never registered via `observe_rtt`.
    pub fn update_rtt(&mut self, peer_id: &str, rtt_millis: f64, now: Instant) {
        let Some(addr) = self.peers.get(peer_id).map(|p| p.addr.clone()) else {
            return;
        };
        self.observe_rtt(peer_id, &addr, rtt_millis, now);
    }

    /// Records a send failure against `peer_id`. Returns `true` exactly when
    /// this call crossed the failure threshold and triggered failover.
    pub fn record_failure(&mut self, peer_id: &str) -> bool {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return false;
        };
        peer.consecutive_failures += 1;
        if peer.consecutive_failures >= FAILOVER_THRESHOLD {
            self.trigger_failover(peer_id);
            return true;
        }
        false
    }

    pub fn record_success(&mut self, peer_id: &str) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.consecutive_failures = 0;
        }
    }

    /// Marks `peer_id` degraded, resets its failure counter, and promotes
    /// the next-best non-degraded peer to primary.
    pub fn trigger_failover(&mut self, peer_id: &str) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.degraded = true;
            peer.consecutive_failures = 0;
        }
        self.select_primary();
    }

    pub fn primary_peer_id(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    pub fn primary_addr(&self) -> Option<&str> {
        self.primary
            .as_ref()
            .and_then(|id| self.peers.get(id))
            .map(|p| p.addr.as_str())
    }

    pub fn is_degraded(&self, peer_id: &str) -> bool {
        self.peers.get(peer_id).map(|p| p.degraded).unwrap_or(false)
    }

    pub fn reprobe_due(&self, peer_id: &str, now: Instant) -> bool {
        self.peers
            .get(peer_id)
            .map(|p| p.degraded && now.duration_since(p.last_probe) >= REPROBE_INTERVAL)
            .unwrap_or(false)
    }

    /// Lowest-RTT non-degraded peer in the low-latency group; falls back to
    /// the lowest-RTT non-degraded peer overall if none qualify.
    fn select_primary(&mut self) {
        let best_low_latency = self
            .peers
            .iter()
            .filter(|(_, p)| !p.degraded && p.group == RttGroup::LowLatency)
            .min_by(|a, b| a.1.rtt_millis.total_cmp(&b.1.rtt_millis))
            .map(|(id, _)| id.clone());

        self.primary = best_low_latency.or_else(|| {
            self.peers
                .iter()
                .filter(|(_, p)| !p.degraded)
                .min_by(|a, b| a.1.rtt_millis.total_cmp(&b.1.rtt_millis))
                .map(|(id, _)| id.clone())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_rtt_peer_in_low_latency_group_becomes_primary() {
        let mut mgr = RedundancyManager::new(50);
        let now = Instant::now();
        mgr.observe_rtt("a", "10.0.0.1:1", 40.0, now);
        mgr.observe_rtt("b", "10.0.0.2:1", 20.0, now);
        mgr.observe_rtt("c", "10.0.0.3:1", 80.0, now);
        assert_eq!(mgr.primary_peer_id(), Some("b"));
    }

    #[test]
    fn failover_after_five_consecutive_failures() {
        let mut mgr = RedundancyManager::new(50);
        let now = Instant::now();
        mgr.observe_rtt("a", "10.0.0.1:1", 10.0, now);
        mgr.observe_rtt("b", "10.0.0.2:1", 20.0, now);

        let mut triggered = false;
        for _ in 0..5 {
            triggered = mgr.record_failure("a");
        }
        assert!(triggered);
        assert!(mgr.is_degraded("a"));
        assert_eq!(mgr.primary_peer_id(), Some("b"));
    }

    #[test]
    fn failover_fires_exactly_once_until_reset() {
        let mut mgr = RedundancyManager::new(50);
        let now = Instant::now();
        mgr.observe_rtt("a", "10.0.0.1:1", 10.0, now);
        mgr.observe_rtt("b", "10.0.0.2:1", 20.0, now);
        for _ in 0..5 {
            mgr.record_failure("a");
        }
        // failures were reset by trigger_failover; a 6th alone shouldn't refire
        let triggered_again = mgr.record_failure("a");
        assert!(!triggered_again);
    }

    #[test]
    fn secondary_group_used_when_no_low_latency_peer_available() {
        let mut mgr = RedundancyManager::new(50);
        let now = Instant::now();
        mgr.observe_rtt("a", "10.0.0.1:1", 200.0, now);
        assert_eq!(mgr.primary_peer_id(), Some("a"));
    }

    #[test]
    fn update_rtt_can_demote_the_primary_out_of_the_low_latency_group() {
        let mut mgr = RedundancyManager::new(50);
        let now = Instant::now();
        mgr.observe_rtt("a", "10.0.0.1:1", 10.0, now);
        mgr.observe_rtt("b", "10.0.0.2:1", 80.0, now);
        assert_eq!(mgr.primary_peer_id(), Some("a"));

        mgr.update_rtt("a", 200.0, now);
        assert_eq!(mgr.primary_peer_id(), Some("b"));
    }

    #[test]
    fn update_rtt_on_an_unregistered_peer_is_a_noop() {
        let mut mgr = RedundancyManager::new(50);
        mgr.update_rtt("ghost", 10.0, Instant::now());
        assert_eq!(mgr.primary_peer_id(), None);
    }
}
