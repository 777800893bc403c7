//! Forest: the missing-shred tracker (spec §4.E).
//!
//! Slot elements live in an arena (`Vec`) and reference each other by
//! 32-bit index with [`NIL`] as the "no such edge" sentinel (spec §9's
//! design note on cyclic graphs). Three side sets (ancestry, frontier,
//! orphaned) partition the live elements by slot.

use std::collections::{HashMap, HashSet};

use crate::types::{Slot, FD_FOREST_ELE_MAX, MAX_DATA_SHREDS, NIL};

/// Fixed-capacity bitmap over shred indices within one slot.
#[derive(Debug, Clone)]
struct Bitmap {
    words: Vec<u64>,
}

impl Bitmap {
    fn new() -> Self {
        Self {
            words: vec![0u64; (MAX_DATA_SHREDS as usize).div_ceil(64)],
        }
    }

    fn set(&mut self, idx: u32) {
        let (word, bit) = (idx as usize / 64, idx as usize % 64);
        self.words[word] |= 1u64 << bit;
    }

    fn get(&self, idx: u32) -> bool {
        let (word, bit) = (idx as usize / 64, idx as usize % 64);
        self.words[word] & (1u64 << bit) != 0
    }
}

/// One forest element (spec §3 "Forest element").
#[derive(Debug, Clone)]
pub struct ForestElement {
    pub slot: Slot,
    parent: u32,
    parent_slot: Option<Slot>,
    child: u32,
    sibling: u32,
    idxs: Bitmap,
    fecs: Bitmap,
    pub buffered_idx: Option<u32>,
    pub complete_idx: Option<u32>,
}

impl ForestElement {
    fn new(slot: Slot, parent_slot: Option<Slot>) -> Self {
        Self {
            slot,
            parent: NIL,
            parent_slot,
            child: NIL,
            sibling: NIL,
            idxs: Bitmap::new(),
            fecs: Bitmap::new(),
            buffered_idx: None,
            complete_idx: None,
        }
    }

    pub fn fec_start_set(&self, idx: u32) -> bool {
        self.fecs.get(idx)
    }

    /// Missing data-shred indices in `[buffered_idx+1, min(complete_idx,
    /// MAX_DATA_SHREDS))` whose bit is clear (spec §4.E "subset
    /// iteration").
    pub fn missing_indices(&self) -> Vec<u32> {
        let start = self.buffered_idx.map(|b| b + 1).unwrap_or(0);
        let end = self
            .complete_idx
            .map(|c| c.min(MAX_DATA_SHREDS))
            .unwrap_or(MAX_DATA_SHREDS);
        (start..end).filter(|i| !self.idxs.get(*i)).collect()
    }
}

/// The full forest (spec §4.E).
pub struct Forest {
    root_slot: Slot,
    elements: Vec<Option<ForestElement>>,
    free_list: Vec<u32>,
    slot_to_index: HashMap<Slot, u32>,
    ancestry: HashSet<u32>,
    frontier: HashSet<u32>,
    orphaned: HashSet<u32>,
}

impl Forest {
    pub fn new(root_slot: Slot) -> Self {
        Self {
            root_slot,
            elements: Vec::new(),
            free_list: Vec::new(),
            slot_to_index: HashMap::new(),
            ancestry: HashSet::new(),
            frontier: HashSet::new(),
            orphaned: HashSet::new(),
        }
    }

    pub fn root_slot(&self) -> Slot {
        self.root_slot
    }

    pub fn element(&self, slot: Slot) -> Option<&ForestElement> {
        self.slot_to_index
            .get(&slot)
            .and_then(|idx| self.elements[*idx as usize].as_ref())
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.slot_to_index.contains_key(&slot)
    }

    pub fn is_frontier(&self, slot: Slot) -> bool {
        self.slot_to_index
            .get(&slot)
            .map(|idx| self.frontier.contains(idx))
            .unwrap_or(false)
    }

    fn alloc(&mut self, elem: ForestElement) -> crate::error::Result<u32> {
        if let Some(idx) = self.free_list.pop() {
            self.elements[idx as usize] = Some(elem);
            return Ok(idx);
        }
        if self.elements.len() >= FD_FOREST_ELE_MAX {
            return Err(crate::error::RepairError::ForestPoolExhausted);
        }
        let idx = self.elements.len() as u32;
        self.elements.push(Some(elem));
        Ok(idx)
    }

    fn get_or_create(&mut self, slot: Slot, parent_off: Option<u64>) -> crate::error::Result<u32> {
        if let Some(&idx) = self.slot_to_index.get(&slot) {
            return Ok(idx);
        }
        let parent_slot = parent_off.and_then(|off| slot.checked_sub(off));
        let idx = self.alloc(ForestElement::new(slot, parent_slot))?;
        self.slot_to_index.insert(slot, idx);

        match parent_slot.and_then(|ps| self.slot_to_index.get(&ps).copied()) {
            Some(parent_idx) if parent_idx != idx => {
                self.attach_child(parent_idx, idx);
                self.frontier.insert(idx);
            }
            _ => {
                self.orphaned.insert(idx);
            }
        }
        self.try_adopt_orphans(slot, idx);
        Ok(idx)
    }

    fn attach_child(&mut self, parent_idx: u32, child_idx: u32) {
        {
            let parent = self.elements[parent_idx as usize].as_mut().unwrap();
            let child = self.elements[child_idx as usize].as_mut().unwrap();
            child.parent = parent_idx;
            child.sibling = parent.child;
            parent.child = child_idx;
        }
        if self.frontier.remove(&parent_idx) {
            self.ancestry.insert(parent_idx);
        }
    }

    /// Adopts any previously orphaned elements whose parent slot is
    /// `new_slot`, transitively (spec §4.E "Linking").
    fn try_adopt_orphans(&mut self, new_slot: Slot, new_idx: u32) {
        let mut frontier_stack = vec![(new_slot, new_idx)];
        while let Some((slot, idx)) = frontier_stack.pop() {
            let candidates: Vec<u32> = self
                .orphaned
                .iter()
                .copied()
                .filter(|o| {
                    self.elements[*o as usize]
                        .as_ref()
                        .and_then(|e| e.parent_slot)
                        == Some(slot)
                })
                .collect();
            for orphan_idx in candidates {
                self.orphaned.remove(&orphan_idx);
                self.attach_child(idx, orphan_idx);
                self.frontier.insert(orphan_idx);
                let orphan_slot = self.elements[orphan_idx as usize].as_ref().unwrap().slot;
                frontier_stack.push((orphan_slot, orphan_idx));
            }
        }
    }

    /// `insert_data_shred` (spec §4.E). Silently ignores shreds at or below
    /// the root watermark.
    pub fn insert_data_shred(
        &mut self,
        slot: Slot,
        parent_off: u64,
        shred_index: u32,
        fec_set_index: u32,
        slot_complete: bool,
    ) -> crate::error::Result<()> {
        if slot <= self.root_slot {
            return Ok(());
        }
        let idx = self.get_or_create(slot, Some(parent_off))?;
        let elem = self.elements[idx as usize].as_mut().unwrap();
        elem.idxs.set(shred_index);
        elem.fecs.set(fec_set_index);
        if slot_complete {
            elem.complete_idx = Some(shred_index);
        }

        let mut buffered = elem.buffered_idx.map(|b| b + 1).unwrap_or(0);
        while elem.idxs.get(buffered) {
            buffered += 1;
            if buffered == MAX_DATA_SHREDS {
                break;
            }
        }
        elem.buffered_idx = if buffered == 0 { None } else { Some(buffered - 1) };
        Ok(())
    }

    /// Registers a slot purely from an orphan request, without shred data
    /// (spec §4.E: "forest elements are created on first shred or
    /// orphan-request").
    pub fn touch_orphan(&mut self, slot: Slot) -> crate::error::Result<()> {
        if slot <= self.root_slot {
            return Ok(());
        }
        self.get_or_create(slot, None)?;
        Ok(())
    }

    /// Traverses frontier ∪ orphaned, yielding `(slot, shred_index)` for
    /// every missing index (spec §4.E "subset iteration").
    pub fn missing_shreds(&self) -> Vec<(Slot, u32)> {
        let mut out = Vec::new();
        for idx in self.frontier.iter().chain(self.orphaned.iter()) {
            let elem = self.elements[*idx as usize].as_ref().unwrap();
            for i in elem.missing_indices() {
                out.push((elem.slot, i));
            }
        }
        out
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    pub fn orphaned_len(&self) -> usize {
        self.orphaned.len()
    }

    /// Smallest FEC-start index strictly greater than `after`, if any
    /// (spec §4.F blind-complete condition (a): "a later FEC set has
    /// already started").
    pub fn next_fec_start_after(&self, slot: Slot, after: u32) -> Option<u32> {
        let elem = self.element(slot)?;
        ((after + 1)..MAX_DATA_SHREDS).find(|i| elem.fec_start_set(*i))
    }

    /// Marks every index in `[start, end]` as received for `slot`, used
    /// when an explicit FEC-complete notification resolves a set (spec
    /// §4.F).
    pub fn mark_range_received(&mut self, slot: Slot, start: u32, end: u32) {
        if let Some(&idx) = self.slot_to_index.get(&slot) {
            if let Some(elem) = self.elements[idx as usize].as_mut() {
                for i in start..=end {
                    elem.idxs.set(i);
                }
            }
        }
    }
}
