//! I/O capability object (spec §9: "Dynamic dispatch for I/O"). Every
//! side effect the engine performs against the outside world — sending a
//! datagram, signing, handing a shred to the block store, asking the
//! block store a question — goes through this one trait so the hard core
//! stays deterministic and testable in isolation.

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;

use crate::types::{PeerEndpoint, Slot};

/// Everything the engine needs from the outside world, modelled the way
/// `fd_repair_tile.c`'s `fd_repair_config_t` function-pointer table does
/// (`clnt_send_fun`, `serv_send_fun`, `sign_fun`, `deliver_fun`,
/// `deliver_fail_fun`, `serv_get_shred_fun`, `serv_get_parent_fun`).
pub trait RepairIo {
    /// Sends a framed datagram from the client (intake) socket.
    fn send_intake(&self, dest: PeerEndpoint, datagram: &[u8]);

    /// Sends a framed datagram from the server (serve) socket.
    fn send_serve(&self, dest: PeerEndpoint, datagram: &[u8]);

    /// Signs `message`, returning an Ed25519 signature under this node's
    /// identity key.
    fn sign(&self, message: &[u8]) -> Signature;

    /// Hands a received shred payload to the block store.
    fn deliver_shred(&self, slot: Slot, shred_index: u32, payload: &[u8]);

    /// Reports that a requested shred could not be delivered (e.g. the
    /// response never arrived and the request expired).
    fn deliver_fail(&self, slot: Slot, shred_index: u32);

    /// Fetches shred `shred_index` of `slot` from the block store, if
    /// present (spec §4.G).
    fn get_shred(&self, slot: Slot, shred_index: u32) -> Option<Vec<u8>>;

    /// Fetches the block-store-advertised highest complete shred index
    /// for `slot`, if known.
    fn get_highest_shred_index(&self, slot: Slot) -> Option<u32>;

    /// Fetches `slot`'s parent slot, if known (spec §4.G "orphan").
    fn get_parent(&self, slot: Slot) -> Option<Slot>;

    /// Returns this node's own pubkey (used to populate request headers).
    fn identity(&self) -> Pubkey;
}
