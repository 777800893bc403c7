//! Shared data-model types (spec §3) used across the engine.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Block height. Slots form a tree rooted at the last rooted slot.
pub type Slot = u64;

/// 32-bit request identifier; wraps and is compared with signed difference.
pub type Nonce = u32;

/// Sentinel used for forest arena indices ("no parent"/"no child"/"no sibling").
pub const NIL: u32 = u32::MAX;

/// Bound on the FEC-intra pool, forest pool, and related fixed-capacity tables.
pub const FD_FOREST_ELE_MAX: usize = 16_384;

/// Fan-out applied to every `need()` call.
pub const FD_REPAIR_NUM_NEEDED_PEERS: usize = 4;

/// Hard cap on the sticky peer set.
pub const FD_REPAIR_STICKY_MAX: usize = 1024;

/// Hard cap on the active peer table.
pub const FD_REPAIR_ACTIVE_MAX: usize = 4096;

/// Hard cap on the pinged-peer table.
pub const FD_REPAIR_PINGED_MAX: usize = 1 << 14;

/// Hard cap on outstanding pending requests.
pub const FD_REPAIR_PENDING_MAX: usize = 1 << 20;

/// Duplicate-suppression window (spec §4.D).
pub const DUP_SUPPRESS_MS: u64 = 200;

/// Pending-request expiry (spec §4.D, §5).
pub const PENDING_EXPIRE_MS: u64 = 5_000;

/// Grace period before a peer newly marked "bad" is excluded from sampling.
pub const BAD_PEER_GRACE_MS: u64 = 5_000;

/// Maximum number of entries sent per batch-send tick (spec §4.D).
pub const SEND_BATCH_MAX: usize = 128;

/// Maximum additional peers drawn by stake-weighted sampling per shuffle.
pub const STAKE_DRAW_MAX: usize = 64;

/// Largest legal shred index within a slot; bounds the forest's bitmaps.
pub const MAX_DATA_SHREDS: u32 = 1 << 16;

/// The three repair request kinds a client may issue and a server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepairKind {
    WindowIndex,
    HighestWindowIndex,
    Orphan,
}

/// Identifies one shred by its position in the slot and its FEC set (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShredRef {
    pub slot: Slot,
    pub shred_index: u32,
    pub fec_set_index: u32,
    pub is_coding: bool,
}

/// A peer's two UDP endpoints (intake, serve), keyed externally by pubkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerEndpoint {
    pub ip: Ipv4Addr,
    pub intake_port: u16,
    pub serve_port: u16,
}

impl PeerEndpoint {
    pub fn new(ip: Ipv4Addr, intake_port: u16, serve_port: u16) -> Self {
        Self {
            ip,
            intake_port,
            serve_port,
        }
    }
}

/// The duplicate-suppression key (spec §3): one in-flight burst per tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DupKey {
    pub kind: RepairKind,
    pub slot: Slot,
    pub shred_index: u32,
}

/// One entry from a stake-weights snapshot (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct StakeEntry {
    pub pubkey: Pubkey,
    pub stake: u64,
}

/// One entry from a contact-info snapshot (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct ContactInfo {
    pub pubkey: Pubkey,
    pub endpoint: PeerEndpoint,
}

/// A repair request as requested by the replay stage (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct RepairRequest {
    pub kind: RepairKind,
    pub slot: Slot,
    pub shred_index: u32,
}

/// Monotonic milliseconds since some epoch, supplied by the embedder via
/// `set_now` rather than read from the wall clock (spec §9).
pub type TimestampMs = u64;
