//! Active peer table (spec §3 "Active peer entry", §4.C decay rules).

use std::collections::HashMap;

use solana_sdk::pubkey::Pubkey;

use crate::error::{RepairError, Result};
use crate::types::{PeerEndpoint, TimestampMs, FD_REPAIR_ACTIVE_MAX};

/// Decay factor applied to `avg_reqs`/`avg_reps`/`avg_lat` every 15-30s
/// (spec "Supplemented from original_source" §2).
pub const STATS_DECAY: f64 = 0.125;

/// One entry in the active peer table, keyed externally by pubkey.
#[derive(Debug, Clone)]
pub struct ActivePeer {
    pub endpoint: PeerEndpoint,
    pub avg_reqs: f64,
    pub avg_reps: f64,
    pub avg_lat: f64,
    pub stake: u64,
    pub sticky: bool,
    pub first_request_time: Option<TimestampMs>,
}

impl ActivePeer {
    fn new(endpoint: PeerEndpoint) -> Self {
        Self {
            endpoint,
            avg_reqs: 0.0,
            avg_reps: 0.0,
            avg_lat: 0.0,
            stake: 0,
            sticky: false,
            first_request_time: None,
        }
    }

    /// Mean per-request round-trip latency (spec §3: "divided by avg_reps
    /// when queried"). `0.0` when no replies have been recorded yet.
    pub fn mean_latency(&self) -> f64 {
        if self.avg_reps > 0.0 {
            self.avg_lat / self.avg_reps
        } else {
            0.0
        }
    }

    fn decay(&mut self) {
        self.avg_reqs *= 1.0 - STATS_DECAY;
        self.avg_reps *= 1.0 - STATS_DECAY;
        self.avg_lat *= 1.0 - STATS_DECAY;
    }
}

/// The full active-peer table. Bounded to [`FD_REPAIR_ACTIVE_MAX`] entries.
pub struct ActivePeerTable {
    peers: HashMap<Pubkey, ActivePeer>,
}

impl ActivePeerTable {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, pubkey: &Pubkey) -> Option<&ActivePeer> {
        self.peers.get(pubkey)
    }

    pub fn get_mut(&mut self, pubkey: &Pubkey) -> Option<&mut ActivePeer> {
        self.peers.get_mut(pubkey)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Pubkey, &ActivePeer)> {
        self.peers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Pubkey, &mut ActivePeer)> {
        self.peers.iter_mut()
    }

    /// Inserts or refreshes a peer's contact endpoint (spec §3: "peers enter
    /// on gossip contact updates; they never depart except through table
    /// eviction under pressure").
    pub fn upsert_contact(&mut self, pubkey: Pubkey, endpoint: PeerEndpoint) -> Result<()> {
        if let Some(existing) = self.peers.get_mut(&pubkey) {
            existing.endpoint = endpoint;
            return Ok(());
        }
        if self.peers.len() >= FD_REPAIR_ACTIVE_MAX {
            return Err(RepairError::PeerTableFull);
        }
        self.peers.insert(pubkey, ActivePeer::new(endpoint));
        Ok(())
    }

    /// Applies a stake-weights snapshot, recording `stake` onto each known
    /// peer entry and returning the total stake observed (spec §4.C step 2).
    pub fn apply_stake_weights(&mut self, weights: &[crate::types::StakeEntry]) -> u64 {
        let mut total = 0u64;
        for w in weights {
            total = total.saturating_add(w.stake);
            if let Some(peer) = self.peers.get_mut(&w.pubkey) {
                peer.stake = w.stake;
            }
        }
        total
    }

    pub fn record_request_sent(&mut self, pubkey: &Pubkey, now: TimestampMs) {
        if let Some(peer) = self.peers.get_mut(pubkey) {
            peer.avg_reqs += 1.0;
            if peer.first_request_time.is_none() {
                peer.first_request_time = Some(now);
            }
        }
    }

    pub fn record_response(&mut self, pubkey: &Pubkey, rtt_ms: u64) {
        if let Some(peer) = self.peers.get_mut(pubkey) {
            peer.avg_reps += 1.0;
            peer.avg_lat += rtt_ms as f64;
        }
    }

    /// Decays every peer's running counters (spec: "decayed 12.5% every
    /// 15-30s"); called from the sticky-shuffle / stats-print timers.
    pub fn decay_all(&mut self) {
        for peer in self.peers.values_mut() {
            peer.decay();
        }
    }
}

impl Default for ActivePeerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::net::Ipv4Addr;

    fn endpoint() -> PeerEndpoint {
        PeerEndpoint::new(Ipv4Addr::new(1, 1, 1, 1), 100, 101)
    }

    #[test]
    fn upsert_then_stake_then_decay() {
        let mut table = ActivePeerTable::new();
        let pk = Pubkey::new_unique();
        table.upsert_contact(pk, endpoint()).unwrap();
        let total = table.apply_stake_weights(&[crate::types::StakeEntry { pubkey: pk, stake: 50 }]);
        assert_eq!(total, 50);
        assert_eq!(table.get(&pk).unwrap().stake, 50);

        table.record_request_sent(&pk, 0);
        table.record_response(&pk, 200);
        assert_eq!(table.get(&pk).unwrap().mean_latency(), 200.0);

        table.decay_all();
        let peer = table.get(&pk).unwrap();
        assert!((peer.avg_reqs - 0.875).abs() < 1e-9);
        assert!((peer.avg_reps - 0.875).abs() < 1e-9);
    }

    #[test]
    fn table_full_is_reported() {
        let mut table = ActivePeerTable::new();
        for _ in 0..FD_REPAIR_ACTIVE_MAX {
            table.upsert_contact(Pubkey::new_unique(), endpoint()).unwrap();
        }
        assert_matches!(
            table.upsert_contact(Pubkey::new_unique(), endpoint()),
            Err(RepairError::PeerTableFull)
        );
    }
}
