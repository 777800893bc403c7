//! FEC repair tracker (spec §4.F): blind-complete detection and explicit
//! FEC-complete handling.

use std::collections::HashMap;

use crate::forest::Forest;
use crate::types::Slot;

/// One FEC-intra entry (spec §3 "FEC-intra entry").
#[derive(Debug, Clone)]
pub struct FecIntra {
    pub slot: Slot,
    pub fec_set_index: u32,
    pub data_cnt: Option<u32>,
    pub recv_cnt: u32,
    pub first_shred_signature: [u8; 64],
    pub parent_off: u64,
    pub completed: bool,
    pub shred_tile_idx: usize,
}

/// A "force complete" announcement to publish to the owning shred tile
/// (spec §4.F: "a message containing the originating shred's 64-byte
/// signature is published to the shred tile that owns this FEC set").
#[derive(Debug, Clone, Copy)]
pub struct ForceCompleteMessage {
    pub shred_tile_idx: usize,
    pub signature: [u8; 64],
    pub data_cnt: u32,
}

/// Result of resolving an explicit FEC-complete notification.
#[derive(Debug, Clone, Copy)]
pub struct FecComplete {
    pub slot: Slot,
    pub fec_set_index: u32,
    pub data_cnt: u32,
}

fn shred_tile_for_signature(signature: &[u8; 64], shred_tile_cnt: usize) -> usize {
    if shred_tile_cnt == 0 {
        return 0;
    }
    let prefix = u64::from_le_bytes(signature[0..8].try_into().unwrap());
    (prefix % shred_tile_cnt as u64) as usize
}

pub struct FecTracker {
    entries: HashMap<(Slot, u32), FecIntra>,
    shred_tile_cnt: usize,
}

impl FecTracker {
    pub fn new(shred_tile_cnt: usize) -> Self {
        Self {
            entries: HashMap::new(),
            shred_tile_cnt,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, slot: Slot, fec_set_index: u32) -> Option<&FecIntra> {
        self.entries.get(&(slot, fec_set_index))
    }

    /// A data shred belonging to the FEC set (spec §4.F: "updates
    /// parent_off, appends to idxs, and updates recv_cnt").
    pub fn record_data_shred(
        &mut self,
        slot: Slot,
        fec_set_index: u32,
        parent_off: u64,
        signature: [u8; 64],
    ) {
        let entry = self
            .entries
            .entry((slot, fec_set_index))
            .or_insert_with(|| FecIntra {
                slot,
                fec_set_index,
                data_cnt: None,
                recv_cnt: 0,
                first_shred_signature: signature,
                parent_off,
                completed: false,
                shred_tile_idx: shred_tile_for_signature(&signature, self.shred_tile_cnt),
            });
        entry.parent_off = parent_off;
        entry.recv_cnt += 1;
    }

    /// A coding shred provides the authoritative `data_cnt` (spec §4.F).
    pub fn record_coding_shred(&mut self, slot: Slot, fec_set_index: u32, data_cnt: u32) {
        let entry = self
            .entries
            .entry((slot, fec_set_index))
            .or_insert_with(|| FecIntra {
                slot,
                fec_set_index,
                data_cnt: None,
                recv_cnt: 0,
                first_shred_signature: [0u8; 64],
                parent_off: 0,
                completed: false,
                shred_tile_idx: 0,
            });
        entry.data_cnt = Some(data_cnt);
    }

    /// Pure blind-complete predicate (spec §4.F, split per the Open
    /// Question at spec §9): returns the inferred `data_cnt` when the set
    /// can be declared complete without a coding shred, without mutating
    /// anything.
    pub fn should_force_complete(fec: &FecIntra, forest: &Forest) -> Option<u32> {
        if fec.data_cnt.is_some() {
            return None;
        }
        if let Some(next_start) = forest.next_fec_start_after(fec.slot, fec.fec_set_index) {
            return Some(next_start - fec.fec_set_index);
        }
        let elem = forest.element(fec.slot)?;
        if let Some(complete_idx) = elem.complete_idx {
            if complete_idx >= fec.fec_set_index {
                return Some(complete_idx + 1 - fec.fec_set_index);
            }
        }
        None
    }

    /// Applies a blind-complete inference: stores `data_cnt` and returns
    /// the message to publish to the owning shred tile.
    pub fn apply_force_complete(
        &mut self,
        slot: Slot,
        fec_set_index: u32,
        data_cnt: u32,
    ) -> Option<ForceCompleteMessage> {
        let entry = self.entries.get_mut(&(slot, fec_set_index))?;
        entry.data_cnt = Some(data_cnt);
        Some(ForceCompleteMessage {
            shred_tile_idx: entry.shred_tile_idx,
            signature: entry.first_shred_signature,
            data_cnt,
        })
    }

    /// Explicit FEC-complete notification (spec §4.F): computes
    /// `data_cnt`, removes the intra entry, and marks every index in the
    /// set as received in the forest.
    pub fn handle_explicit_complete(
        &mut self,
        slot: Slot,
        fec_set_index: u32,
        shred_index: u32,
        forest: &mut Forest,
    ) -> FecComplete {
        let data_cnt = shred_index + 1 - fec_set_index;
        self.entries.remove(&(slot, fec_set_index));
        forest.mark_range_received(slot, fec_set_index, shred_index);
        FecComplete {
            slot,
            fec_set_index,
            data_cnt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blind_complete_fires_on_slot_complete_flag() {
        let mut forest = Forest::new(0);
        for i in 0..31u32 {
            forest.insert_data_shred(5, 5, i, 0, false).unwrap();
        }
        forest.insert_data_shred(5, 5, 31, 0, true).unwrap();

        let mut tracker = FecTracker::new(4);
        for i in 0..32u32 {
            tracker.record_data_shred(5, 0, 5, [i as u8; 64]);
        }

        let fec = tracker.get(5, 0).unwrap();
        let inferred = FecTracker::should_force_complete(fec, &forest);
        assert_eq!(inferred, Some(32));

        let msg = tracker.apply_force_complete(5, 0, 32).unwrap();
        assert_eq!(msg.data_cnt, 32);
        assert_eq!(tracker.get(5, 0).unwrap().data_cnt, Some(32));
    }

    #[test]
    fn blind_complete_does_not_fire_with_known_data_cnt() {
        let forest = Forest::new(0);
        let mut tracker = FecTracker::new(4);
        tracker.record_coding_shred(5, 0, 10);
        let fec = tracker.get(5, 0).unwrap();
        assert_eq!(FecTracker::should_force_complete(fec, &forest), None);
    }

    #[test]
    fn explicit_complete_removes_entry_and_marks_forest() {
        let mut forest = Forest::new(0);
        forest.insert_data_shred(5, 5, 0, 0, false).unwrap();
        let mut tracker = FecTracker::new(4);
        tracker.record_data_shred(5, 0, 5, [1u8; 64]);

        let result = tracker.handle_explicit_complete(5, 0, 3, &mut forest);
        assert_eq!(result.data_cnt, 4);
        assert!(tracker.get(5, 0).is_none());
        let missing = forest.element(5).unwrap().missing_indices();
        assert!(!missing.iter().any(|i| *i <= 3));
    }
}
