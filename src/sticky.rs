//! Sticky peer selector (spec §4.C) and the scheduler's peer-sampling walk
//! (spec §4.D's `actives_sample`).

use solana_sdk::pubkey::Pubkey;

use crate::peer_table::ActivePeerTable;
use crate::types::{TimestampMs, BAD_PEER_GRACE_MS, FD_REPAIR_STICKY_MAX, STAKE_DRAW_MAX};

/// Peer quality classification (spec §4.C step 4, thresholds from
/// "Supplemented from original_source" §2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerClass {
    Great,
    Good,
    Bad,
}

const GREAT_RESPONSE_RATE: f64 = 0.8;
const GREAT_MAX_LATENCY_MS: f64 = 2_500.0;
const GREAT_MIN_REQUESTS: f64 = 20.0;
const BAD_MAX_RESPONSE_RATE: f64 = 0.01;
const BAD_MIN_REQUESTS: f64 = 10.0;

/// Classifies a peer using its current running counters.
pub fn classify(avg_reqs: f64, avg_reps: f64, avg_lat: f64) -> PeerClass {
    let response_rate = if avg_reqs > 0.0 { avg_reps / avg_reqs } else { 0.0 };
    let mean_latency = if avg_reps > 0.0 { avg_lat / avg_reps } else { 0.0 };

    if avg_reqs >= BAD_MIN_REQUESTS && response_rate < BAD_MAX_RESPONSE_RATE {
        return PeerClass::Bad;
    }
    if response_rate >= GREAT_RESPONSE_RATE
        && mean_latency <= GREAT_MAX_LATENCY_MS
        && avg_reqs >= GREAT_MIN_REQUESTS
    {
        return PeerClass::Great;
    }
    PeerClass::Good
}

/// Computes the first quartile of a sorted latency sample. Returns `None`
/// if fewer than four samples are present (spec: "or infinity if under
/// four samples").
fn first_quartile(mut latencies: Vec<f64>) -> Option<f64> {
    if latencies.len() < 4 {
        return None;
    }
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = latencies.len() / 4;
    Some(latencies[idx])
}

/// Rebuilds the sticky peer set (spec §4.C). `previous_sticky` is the
/// outgoing set (used only to know which peers were sticky going in);
/// returns the new sticky set, capped at `FD_REPAIR_STICKY_MAX`.
///
/// Does nothing (returns the previous set unchanged) when `total_stake`
/// is zero, matching step 1's "never repair without stake context".
pub fn shuffle(
    peers: &mut ActivePeerTable,
    previous_sticky: &[Pubkey],
    total_stake: u64,
    rng: &mut dyn rand::RngCore,
) -> Vec<Pubkey> {
    if total_stake == 0 {
        return previous_sticky.to_vec();
    }

    let sample_latencies: Vec<f64> = previous_sticky
        .iter()
        .filter_map(|pk| peers.get(pk))
        .filter(|p| p.avg_reps > 0.0)
        .map(|p| p.mean_latency())
        .collect();
    let acceptable_latency = first_quartile(sample_latencies)
        .map(|q1| 2.0 * q1)
        .unwrap_or(f64::INFINITY);

    for (_, peer) in peers.iter_mut() {
        peer.sticky = false;
    }

    let mut great = Vec::new();
    let mut good = Vec::new();

    for pk in previous_sticky {
        let Some(peer) = peers.get(pk) else { continue };
        if peer.mean_latency() > acceptable_latency {
            continue;
        }
        match classify(peer.avg_reqs, peer.avg_reps, peer.avg_lat) {
            PeerClass::Great => great.push(*pk),
            PeerClass::Good => good.push(*pk),
            PeerClass::Bad => {}
        }
    }

    let budget = FD_REPAIR_STICKY_MAX.saturating_sub(2);
    let mut sticky: Vec<Pubkey> = Vec::with_capacity(budget.min(great.len() + good.len()));
    sticky.extend(great.into_iter().take(budget));
    let remaining = budget.saturating_sub(sticky.len());
    sticky.extend(good.into_iter().take(remaining));

    let drawn = stake_weighted_draw(peers, &sticky, total_stake, STAKE_DRAW_MAX, rng);
    sticky.extend(drawn);

    for pk in &sticky {
        if let Some(peer) = peers.get_mut(pk) {
            peer.sticky = true;
        }
    }
    sticky
}

/// Draws up to `count` peers from `peers` that are not already in
/// `excluded`, sampling without replacement via repeated "uniform target
/// in `[0, total_stake)`, first peer whose cumulative stake reaches it"
/// (spec §4.C step 6).
fn stake_weighted_draw(
    peers: &ActivePeerTable,
    excluded: &[Pubkey],
    total_stake: u64,
    count: usize,
    rng: &mut dyn rand::RngCore,
) -> Vec<Pubkey> {
    let mut pool: Vec<(Pubkey, u64)> = peers
        .iter()
        .filter(|(pk, p)| p.stake > 0 && !excluded.contains(pk))
        .map(|(pk, p)| (*pk, p.stake))
        .collect();

    let mut drawn = Vec::new();
    let mut remaining_stake: u64 = pool.iter().map(|(_, s)| *s).sum();

    while drawn.len() < count && !pool.is_empty() && remaining_stake > 0 {
        let target = rng.next_u64() % remaining_stake;
        let mut cumulative: u64 = 0;
        let mut pick = pool.len() - 1;
        for (i, (_, stake)) in pool.iter().enumerate() {
            cumulative += *stake;
            if cumulative > target {
                pick = i;
                break;
            }
        }
        let (pubkey, stake) = pool.remove(pick);
        remaining_stake -= stake;
        drawn.push(pubkey);
    }
    drawn
}

/// Walks a cursor through `sticky` using a linear-congruential step,
/// returning up to `count` peers and discarding peers classified "bad"
/// unless they are still within their grace period (spec §4.D).
pub struct StickyCursor {
    state: u64,
}

impl StickyCursor {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_index(&mut self, len: usize) -> usize {
        // Numerical Recipes LCG constants; only used to walk a small ring.
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.state >> 33) as usize % len
    }

    pub fn sample(
        &mut self,
        sticky: &[Pubkey],
        peers: &ActivePeerTable,
        now: TimestampMs,
        count: usize,
    ) -> Vec<Pubkey> {
        if sticky.is_empty() {
            return Vec::new();
        }
        let mut picked = Vec::with_capacity(count);
        let mut attempts = 0;
        let max_attempts = sticky.len().max(1) * 4;
        while picked.len() < count && attempts < max_attempts {
            attempts += 1;
            let idx = self.next_index(sticky.len());
            let pk = sticky[idx];
            let Some(peer) = peers.get(&pk) else { continue };

            let in_grace = peer
                .first_request_time
                .map(|t| now.saturating_sub(t) < BAD_PEER_GRACE_MS)
                .unwrap_or(true);
            if !in_grace
                && classify(peer.avg_reqs, peer.avg_reps, peer.avg_lat) == PeerClass::Bad
            {
                continue;
            }
            if !picked.contains(&pk) {
                picked.push(pk);
            }
        }
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PeerEndpoint, StakeEntry};
    use rand::SeedableRng;
    use rand_chacha::ChaChaRng;
    use std::net::Ipv4Addr;

    fn endpoint() -> PeerEndpoint {
        PeerEndpoint::new(Ipv4Addr::new(1, 1, 1, 1), 1, 2)
    }

    #[test]
    fn no_stake_leaves_sticky_set_untouched() {
        let mut peers = ActivePeerTable::new();
        let mut rng = ChaChaRng::seed_from_u64(0);
        let result = shuffle(&mut peers, &[], 0, &mut rng);
        assert!(result.is_empty());
    }

    #[test]
    fn shuffle_draws_stake_weighted_peers() {
        let mut peers = ActivePeerTable::new();
        let mut rng = ChaChaRng::seed_from_u64(0);
        let p1 = Pubkey::new_unique();
        let p2 = Pubkey::new_unique();
        peers.upsert_contact(p1, endpoint()).unwrap();
        peers.upsert_contact(p2, endpoint()).unwrap();
        let total = peers.apply_stake_weights(&[
            StakeEntry { pubkey: p1, stake: 100 },
            StakeEntry { pubkey: p2, stake: 200 },
        ]);

        let sticky = shuffle(&mut peers, &[], total, &mut rng);
        assert_eq!(sticky.len(), 2);
        assert!(sticky.contains(&p1));
        assert!(sticky.contains(&p2));
    }

    #[test]
    fn classify_thresholds() {
        assert_eq!(classify(25.0, 22.0, 25_000.0), PeerClass::Great);
        assert_eq!(classify(20.0, 1.0, 100.0), PeerClass::Good);
        assert_eq!(classify(10.0, 0.0, 0.0), PeerClass::Bad);
    }

    #[test]
    fn cursor_samples_from_non_empty_set() {
        let mut peers = ActivePeerTable::new();
        let p1 = Pubkey::new_unique();
        peers.upsert_contact(p1, endpoint()).unwrap();
        let mut cursor = StickyCursor::new(42);
        let picked = cursor.sample(&[p1], &peers, 0, 1);
        assert_eq!(picked, vec![p1]);
    }
}
