//! Server responder (spec §4.G): answers window/highest-window/orphan
//! requests against the block store, after ping verification.

use log::warn;
use solana_sdk::pubkey::Pubkey;

use crate::capabilities::RepairIo;
use crate::metrics::RepairMetrics;
use crate::types::{Nonce, PeerEndpoint, Slot};
use crate::wire::append_nonce;

const MAX_ORPHAN_HOPS: usize = 10;

/// Answers a `window_index(slot, i)` request: fetch shred `i` of `slot`
/// and send it once, with a trailing nonce. Silent on a block-store miss.
pub fn handle_window_index(
    io: &dyn RepairIo,
    metrics: &mut RepairMetrics,
    dest: PeerEndpoint,
    slot: Slot,
    shred_index: u32,
    nonce: Nonce,
) {
    match io.get_shred(slot, shred_index) {
        Some(shred) => {
            io.send_serve(dest, &append_nonce(shred, nonce));
            metrics.send_pkt_cnt += 1;
        }
        None => metrics.serv_shred_miss_cnt += 1,
    }
}

/// Answers a `highest_window_index(slot)` request: fetch the block-store
/// advertised highest complete shred for `slot`.
pub fn handle_highest_window_index(
    io: &dyn RepairIo,
    metrics: &mut RepairMetrics,
    dest: PeerEndpoint,
    slot: Slot,
    nonce: Nonce,
) {
    let Some(highest) = io.get_highest_shred_index(slot) else {
        metrics.serv_shred_miss_cnt += 1;
        return;
    };
    match io.get_shred(slot, highest) {
        Some(shred) => {
            io.send_serve(dest, &append_nonce(shred, nonce));
            metrics.send_pkt_cnt += 1;
        }
        None => metrics.serv_shred_miss_cnt += 1,
    }
}

/// Answers an `orphan(slot)` request: walk up to 10 parents, sending each
/// parent's highest shred, stopping once the parent is null or ≤ 1.
pub fn handle_orphan(
    io: &dyn RepairIo,
    metrics: &mut RepairMetrics,
    dest: PeerEndpoint,
    slot: Slot,
    nonce: Nonce,
) {
    let mut current = slot;
    for _ in 0..MAX_ORPHAN_HOPS {
        let Some(parent) = io.get_parent(current) else {
            break;
        };
        if parent <= 1 {
            break;
        }
        if let Some(highest) = io.get_highest_shred_index(parent) {
            if let Some(shred) = io.get_shred(parent, highest) {
                io.send_serve(dest, &append_nonce(shred, nonce));
                metrics.send_pkt_cnt += 1;
            }
        }
        current = parent;
    }
}

/// Logs a warning at most once per batch for a dropped request, matching
/// the teacher's warn-and-continue style for malformed input.
pub fn warn_dropped(reason: &str, peer: &Pubkey) {
    warn!("dropping repair request from {peer}: {reason}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::net::Ipv4Addr;

    struct FakeIo {
        shreds: RefCell<std::collections::HashMap<(Slot, u32), Vec<u8>>>,
        highest: RefCell<std::collections::HashMap<Slot, u32>>,
        parents: RefCell<std::collections::HashMap<Slot, Slot>>,
        sent: RefCell<Vec<Vec<u8>>>,
    }

    impl FakeIo {
        fn new() -> Self {
            Self {
                shreds: RefCell::new(Default::default()),
                highest: RefCell::new(Default::default()),
                parents: RefCell::new(Default::default()),
                sent: RefCell::new(Vec::new()),
            }
        }
    }

    impl RepairIo for FakeIo {
        fn send_intake(&self, _dest: PeerEndpoint, _datagram: &[u8]) {}
        fn send_serve(&self, _dest: PeerEndpoint, datagram: &[u8]) {
            self.sent.borrow_mut().push(datagram.to_vec());
        }
        fn sign(&self, _message: &[u8]) -> solana_sdk::signature::Signature {
            solana_sdk::signature::Signature::default()
        }
        fn deliver_shred(&self, _slot: Slot, _shred_index: u32, _payload: &[u8]) {}
        fn deliver_fail(&self, _slot: Slot, _shred_index: u32) {}
        fn get_shred(&self, slot: Slot, shred_index: u32) -> Option<Vec<u8>> {
            self.shreds.borrow().get(&(slot, shred_index)).cloned()
        }
        fn get_highest_shred_index(&self, slot: Slot) -> Option<u32> {
            self.highest.borrow().get(&slot).copied()
        }
        fn get_parent(&self, slot: Slot) -> Option<Slot> {
            self.parents.borrow().get(&slot).copied()
        }
        fn identity(&self) -> Pubkey {
            Pubkey::new_unique()
        }
    }

    fn endpoint() -> PeerEndpoint {
        PeerEndpoint::new(Ipv4Addr::new(1, 2, 3, 4), 100, 101)
    }

    #[test]
    fn window_index_sends_shred_with_nonce() {
        let io = FakeIo::new();
        io.shreds.borrow_mut().insert((5, 0), vec![1, 2, 3]);
        let mut metrics = RepairMetrics::default();
        handle_window_index(&io, &mut metrics, endpoint(), 5, 0, 42);
        let sent = io.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..3], &[1, 2, 3]);
        assert_eq!(metrics.send_pkt_cnt, 1);
    }

    #[test]
    fn window_index_miss_is_silent() {
        let io = FakeIo::new();
        let mut metrics = RepairMetrics::default();
        handle_window_index(&io, &mut metrics, endpoint(), 5, 0, 42);
        assert!(io.sent.borrow().is_empty());
        assert_eq!(metrics.serv_shred_miss_cnt, 1);
    }

    #[test]
    fn orphan_walk_stops_at_floor() {
        let io = FakeIo::new();
        io.parents.borrow_mut().insert(100, 50);
        io.parents.borrow_mut().insert(50, 1);
        io.highest.borrow_mut().insert(50, 0);
        io.shreds.borrow_mut().insert((50, 0), vec![9]);
        let mut metrics = RepairMetrics::default();
        handle_orphan(&io, &mut metrics, endpoint(), 100, 7);
        assert_eq!(io.sent.borrow().len(), 1);
    }
}
