//! Request scheduler (spec §4.D): nonce lifecycle, duplicate suppression,
//! batch send, and expiry.

use std::collections::{HashMap, VecDeque};

use solana_sdk::pubkey::Pubkey;

use crate::error::{RepairError, Result};
use crate::sticky::StickyCursor;
use crate::peer_table::ActivePeerTable;
use crate::types::{
    DupKey, Nonce, RepairKind, TimestampMs, DUP_SUPPRESS_MS, FD_REPAIR_NUM_NEEDED_PEERS,
    FD_REPAIR_PENDING_MAX, PENDING_EXPIRE_MS, SEND_BATCH_MAX,
};

struct DupEntry {
    last_send_time: TimestampMs,
    req_cnt: usize,
}

/// A still-outstanding request (spec §3 "Pending request").
#[derive(Debug, Clone, Copy)]
pub struct PendingEntry {
    pub peer: Pubkey,
    pub dup_key: DupKey,
    pub issued_at: TimestampMs,
}

/// One request ready to be framed and transmitted by the caller.
#[derive(Debug, Clone, Copy)]
pub struct OutboundRequest {
    pub nonce: Nonce,
    pub peer: Pubkey,
    pub dup_key: DupKey,
}

pub struct Scheduler {
    oldest_nonce: Nonce,
    current_nonce: Nonce,
    next_nonce: Nonce,
    pending: HashMap<Nonce, PendingEntry>,
    dup: HashMap<DupKey, DupEntry>,
    /// Nonces in strict allocation order, used to walk expiry in order.
    order: VecDeque<Nonce>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            oldest_nonce: 0,
            current_nonce: 0,
            next_nonce: 0,
            pending: HashMap::new(),
            dup: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn oldest_nonce(&self) -> Nonce {
        self.oldest_nonce
    }

    pub fn current_nonce(&self) -> Nonce {
        self.current_nonce
    }

    pub fn next_nonce(&self) -> Nonce {
        self.next_nonce
    }

    /// Sum of `req_cnt` across the duplicate table; must equal
    /// [`Self::pending_len`] (spec §8 invariant 3).
    pub fn total_dup_refcount(&self) -> usize {
        self.dup.values().map(|e| e.req_cnt).sum()
    }

    /// `need(kind, slot, shred_index)` (spec §4.D "Create").
    #[allow(clippy::too_many_arguments)]
    pub fn need(
        &mut self,
        kind: RepairKind,
        slot: u64,
        shred_index: u32,
        now: TimestampMs,
        sticky: &[Pubkey],
        peers: &ActivePeerTable,
        cursor: &mut StickyCursor,
    ) -> Result<()> {
        let key = DupKey {
            kind,
            slot,
            shred_index,
        };

        if let Some(entry) = self.dup.get(&key) {
            if now.saturating_sub(entry.last_send_time) < DUP_SUPPRESS_MS {
                return Ok(());
            }
        } else {
            self.dup.insert(
                key,
                DupEntry {
                    last_send_time: 0,
                    req_cnt: 0,
                },
            );
        }

        let sampled = cursor.sample(sticky, peers, now, FD_REPAIR_NUM_NEEDED_PEERS);
        if sampled.is_empty() {
            return Ok(());
        }
        if self.pending.len() + sampled.len() > FD_REPAIR_PENDING_MAX {
            return Err(RepairError::PendingTableFull);
        }

        for peer in &sampled {
            let nonce = self.next_nonce;
            self.next_nonce = self.next_nonce.wrapping_add(1);
            self.pending.insert(
                nonce,
                PendingEntry {
                    peer: *peer,
                    dup_key: key,
                    issued_at: now,
                },
            );
            self.order.push_back(nonce);
        }

        let entry = self.dup.get_mut(&key).expect("just inserted or present");
        entry.last_send_time = now;
        entry.req_cnt = sampled.len();
        Ok(())
    }

    /// Batch-send tick (spec §4.D "Send batch"): returns up to
    /// [`SEND_BATCH_MAX`] requests to frame and transmit, advancing
    /// `current_nonce` past each one and bumping the peer's `avg_reqs`.
    pub fn send_batch(&mut self, peers: &mut ActivePeerTable, now: TimestampMs) -> Vec<OutboundRequest> {
        let mut out = Vec::new();
        while out.len() < SEND_BATCH_MAX && self.current_nonce != self.next_nonce {
            let nonce = self.current_nonce;
            self.current_nonce = self.current_nonce.wrapping_add(1);
            if let Some(entry) = self.pending.get(&nonce) {
                peers.record_request_sent(&entry.peer, now);
                out.push(OutboundRequest {
                    nonce,
                    peer: entry.peer,
                    dup_key: entry.dup_key,
                });
            }
        }
        out
    }

    /// Expiry sweep (spec §4.D "Expire", §5: 5s timeout). Advances
    /// `oldest_nonce` past any resolved or stale pending entry, and
    /// returns the `DupKey`s whose last outstanding copy just expired, so
    /// the caller can report delivery failure for those (spec §6
    /// `deliver_fail`).
    pub fn expire(&mut self, now: TimestampMs) -> Vec<DupKey> {
        let mut failed = Vec::new();
        while let Some(&nonce) = self.order.front() {
            match self.pending.get(&nonce) {
                Some(entry) => {
                    if now.saturating_sub(entry.issued_at) < PENDING_EXPIRE_MS {
                        break;
                    }
                    let dup_key = entry.dup_key;
                    self.pending.remove(&nonce);
                    if self.drop_dup_ref(&dup_key) {
                        failed.push(dup_key);
                    }
                }
                None => {}
            }
            self.order.pop_front();
            self.oldest_nonce = nonce.wrapping_add(1);
        }
        failed
    }

    /// Response match (spec §4.D "Response match"): returns the resolved
    /// pending entry, if `nonce` was outstanding, without touching the
    /// duplicate-table refcount (responses do not cancel sibling copies).
    pub fn match_response(
        &mut self,
        nonce: Nonce,
        now: TimestampMs,
        peers: &mut ActivePeerTable,
    ) -> Option<PendingEntry> {
        let entry = self.pending.remove(&nonce)?;
        peers.record_response(&entry.peer, now.saturating_sub(entry.issued_at));
        Some(entry)
    }

    /// Decrements a duplicate-key's refcount, removing the entry once it
    /// reaches zero. Returns `true` when this call was the one that
    /// dropped the entry to zero.
    fn drop_dup_ref(&mut self, key: &DupKey) -> bool {
        if let Some(entry) = self.dup.get_mut(key) {
            entry.req_cnt = entry.req_cnt.saturating_sub(1);
            if entry.req_cnt == 0 {
                self.dup.remove(key);
                return true;
            }
        }
        false
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PeerEndpoint, StakeEntry};
    use std::net::Ipv4Addr;

    fn peer_table_with(pks: &[Pubkey]) -> ActivePeerTable {
        let mut t = ActivePeerTable::new();
        for pk in pks {
            t.upsert_contact(*pk, PeerEndpoint::new(Ipv4Addr::new(1, 2, 3, 4), 1, 2))
                .unwrap();
        }
        t.apply_stake_weights(
            &pks.iter()
                .map(|pk| StakeEntry { pubkey: *pk, stake: 10 })
                .collect::<Vec<_>>(),
        );
        t
    }

    #[test]
    fn need_then_send_then_match() {
        let p1 = Pubkey::new_unique();
        let p2 = Pubkey::new_unique();
        let mut peers = peer_table_with(&[p1, p2]);
        let sticky = vec![p1, p2];
        let mut cursor = StickyCursor::new(1);
        let mut sched = Scheduler::new();

        sched
            .need(RepairKind::WindowIndex, 42, 0, 0, &sticky, &peers, &mut cursor)
            .unwrap();
        assert_eq!(sched.pending_len(), 2);
        assert_eq!(sched.total_dup_refcount(), 2);

        let batch = sched.send_batch(&mut peers, 1);
        assert_eq!(batch.len(), 2);
        assert_eq!(sched.current_nonce(), sched.next_nonce());

        let nonce = batch[0].nonce;
        let resolved = sched.match_response(nonce, 50, &mut peers).unwrap();
        assert_eq!(resolved.dup_key.slot, 42);
        assert_eq!(sched.pending_len(), 1);
        // the dup entry is untouched by a response match
        assert_eq!(sched.total_dup_refcount(), 2);
    }

    #[test]
    fn duplicate_need_within_window_is_a_no_op() {
        let p1 = Pubkey::new_unique();
        let peers = peer_table_with(&[p1]);
        let sticky = vec![p1];
        let mut cursor = StickyCursor::new(1);
        let mut sched = Scheduler::new();

        sched
            .need(RepairKind::WindowIndex, 42, 0, 0, &sticky, &peers, &mut cursor)
            .unwrap();
        let first_len = sched.pending_len();
        sched
            .need(RepairKind::WindowIndex, 42, 0, 50, &sticky, &peers, &mut cursor)
            .unwrap();
        assert_eq!(sched.pending_len(), first_len);
    }

    #[test]
    fn expiry_clears_stale_pending_and_dup_entries() {
        let p1 = Pubkey::new_unique();
        let peers = peer_table_with(&[p1]);
        let sticky = vec![p1];
        let mut cursor = StickyCursor::new(1);
        let mut sched = Scheduler::new();

        sched
            .need(RepairKind::Orphan, 7, 0, 0, &sticky, &peers, &mut cursor)
            .unwrap();
        assert_eq!(sched.pending_len(), 1);

        sched.expire(6_000);
        assert_eq!(sched.pending_len(), 0);
        assert_eq!(sched.total_dup_refcount(), 0);
        assert_eq!(sched.oldest_nonce(), sched.next_nonce());
    }

    #[test]
    fn nonce_wrap_still_expires_correctly() {
        let p1 = Pubkey::new_unique();
        let peers = peer_table_with(&[p1]);
        let sticky = vec![p1];
        let mut cursor = StickyCursor::new(1);
        let mut sched = Scheduler::new();
        sched.oldest_nonce = 0xFFFF_FFF0;
        sched.current_nonce = 0xFFFF_FFF0;
        sched.next_nonce = 0xFFFF_FFF0;

        for i in 0..32u64 {
            sched
                .need(RepairKind::WindowIndex, i, 0, 0, &sticky, &peers, &mut cursor)
                .unwrap();
        }
        assert_eq!(sched.pending_len(), 32);
        sched.expire(10_000);
        assert_eq!(sched.pending_len(), 0);
        assert_eq!(sched.oldest_nonce(), sched.next_nonce());
    }
}
