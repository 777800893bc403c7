//! Recognized configuration options (spec §6). This crate only defines
//! the struct; parsing CLI args or a TOML/JSON file is the embedding
//! binary's job, matching how `solana-core`'s `*Config` structs (e.g.
//! `RepairInfo`) are built by an outer CLI layer and handed in.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Path to a 64-byte ed25519 seed+pubkey blob.
    pub identity_key_path: PathBuf,
    pub repair_intake_listen_port: u16,
    pub repair_serve_listen_port: u16,
    /// Capacity of the FEC-intra pool, minus 2.
    pub max_pending_shred_sets: usize,
    /// Number of downstream shred tiles (≤ 16).
    pub shred_tile_cnt: usize,
    pub good_peer_cache_file: PathBuf,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            identity_key_path: PathBuf::from("identity.json"),
            repair_intake_listen_port: 8007,
            repair_serve_listen_port: 8008,
            max_pending_shred_sets: crate::types::FD_FOREST_ELE_MAX - 2,
            shred_tile_cnt: 4,
            good_peer_cache_file: PathBuf::from("repair_peers.txt"),
        }
    }
}
