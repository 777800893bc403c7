//! Peer table & anti-abuse ping/pong (spec §4.B).
//!
//! An inbound request from an unverified peer gets a `ping` bound to its
//! endpoint instead of an answer; only a correctly signed `pong` over the
//! matching token flips that peer to `good`. Bounded to
//! [`FD_REPAIR_PINGED_MAX`] entries; overflow is a caller-visible error so
//! the caller can bump a "full table" counter.

use rand::RngCore;
use solana_hash::hashv;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::collections::HashMap;

use crate::error::{RepairError, Result};
use crate::types::{PeerEndpoint, FD_REPAIR_PINGED_MAX};
use crate::wire::Pong;

const PING_PONG_PREFIX: &[u8] = b"SOLANA_PING_PONG";

/// One entry in the pinged-peer table (spec §3: "Pinged peer").
#[derive(Debug, Clone)]
pub struct PingedPeer {
    pub expected_pubkey: Pubkey,
    pub token: [u8; 32],
    pub good: bool,
}

/// Computes the SHA-256 of `"SOLANA_PING_PONG" || token`, the pre-image
/// that both the pong's `hash` field and its signature cover.
pub fn preimage_hash(token: &[u8; 32]) -> [u8; 32] {
    hashv(&[PING_PONG_PREFIX, token]).to_bytes()
}

/// Generates a fresh random 32-byte token for a new ping.
pub fn generate_token(rng: &mut dyn RngCore) -> [u8; 32] {
    let mut token = [0u8; 32];
    rng.fill_bytes(&mut token);
    token
}

/// Table of peers this node has challenged, keyed by the endpoint they
/// contacted us from.
pub struct PingedPeerTable {
    entries: HashMap<PeerEndpoint, PingedPeer>,
}

impl PingedPeerTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Starts a challenge for `endpoint`, claiming to belong to
    /// `expected_pubkey`. Returns the token to embed in the outbound ping.
    pub fn challenge(
        &mut self,
        endpoint: PeerEndpoint,
        expected_pubkey: Pubkey,
        rng: &mut dyn RngCore,
    ) -> Result<[u8; 32]> {
        if !self.entries.contains_key(&endpoint) && self.entries.len() >= FD_REPAIR_PINGED_MAX {
            return Err(RepairError::PingedTableFull);
        }
        let token = generate_token(rng);
        self.entries.insert(
            endpoint,
            PingedPeer {
                expected_pubkey,
                token,
                good: false,
            },
        );
        Ok(token)
    }

    /// Verifies an inbound pong against the challenge stored for `endpoint`.
    /// On success marks the peer `good` and returns `true`.
    ///
    /// `signature`/`signed_bytes` are the wire-level signature and the bytes
    /// it was computed over (see [`crate::wire::decode_response`]); the pong
    /// is accepted only if that signature verifies under the claimed pubkey
    /// AND `pong.hash` matches the stored token's pre-image hash.
    pub fn verify_pong(
        &mut self,
        endpoint: PeerEndpoint,
        pong: &Pong,
        signature: &Signature,
        signed_bytes: &[u8],
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&endpoint) else {
            return false;
        };
        if pong.from != entry.expected_pubkey {
            return false;
        }
        if pong.hash != preimage_hash(&entry.token) {
            return false;
        }
        if !signature.verify(pong.from.as_ref(), signed_bytes) {
            return false;
        }
        entry.good = true;
        true
    }

    /// Whether `endpoint` is currently verified under `claimed_pubkey`
    /// (spec §4.B: "subsequent requests are served only while good holds
    /// and the claimed pubkey matches the stored id").
    pub fn is_good(&self, endpoint: PeerEndpoint, claimed_pubkey: &Pubkey) -> bool {
        self.entries
            .get(&endpoint)
            .map(|e| e.good && &e.expected_pubkey == claimed_pubkey)
            .unwrap_or(false)
    }
}

impl Default for PingedPeerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the `pong` this node sends back in reply to a received `ping`,
/// bound to the token carried by that ping (spec §4.B, client side).
pub fn build_pong(from: Pubkey, token: &[u8; 32]) -> Pong {
    Pong {
        from,
        hash: preimage_hash(token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::SeedableRng;
    use rand_chacha::ChaChaRng;
    use solana_sdk::signer::keypair::Keypair;
    use solana_sdk::signer::Signer;

    fn rng() -> ChaChaRng {
        ChaChaRng::seed_from_u64(1)
    }

    fn endpoint() -> PeerEndpoint {
        PeerEndpoint::new(std::net::Ipv4Addr::new(1, 2, 3, 4), 8000, 8001)
    }

    #[test]
    fn valid_pong_marks_peer_good() {
        let mut table = PingedPeerTable::new();
        let keypair = Keypair::new();
        let mut r = rng();
        let token = table
            .challenge(endpoint(), keypair.pubkey(), &mut r)
            .unwrap();

        let pong = build_pong(keypair.pubkey(), &token);
        let signed_bytes = bincode::serialize(&pong).unwrap();
        let signature = keypair.sign_message(&signed_bytes);

        assert!(!table.is_good(endpoint(), &keypair.pubkey()));
        assert!(table.verify_pong(endpoint(), &pong, &signature, &signed_bytes));
        assert!(table.is_good(endpoint(), &keypair.pubkey()));
    }

    #[test]
    fn pong_with_wrong_token_is_rejected() {
        let mut table = PingedPeerTable::new();
        let keypair = Keypair::new();
        let mut r = rng();
        table
            .challenge(endpoint(), keypair.pubkey(), &mut r)
            .unwrap();

        let bogus_token = [7u8; 32];
        let pong = build_pong(keypair.pubkey(), &bogus_token);
        let signed_bytes = bincode::serialize(&pong).unwrap();
        let signature = keypair.sign_message(&signed_bytes);

        assert!(!table.verify_pong(endpoint(), &pong, &signature, &signed_bytes));
    }

    #[test]
    fn table_rejects_insert_past_capacity() {
        let mut table = PingedPeerTable::new();
        let mut r = rng();
        for i in 0..FD_REPAIR_PINGED_MAX {
            let ep = PeerEndpoint::new(std::net::Ipv4Addr::new(10, 0, 0, 0), 0, (i % 65536) as u16);
            let _ = table.entries.insert(
                ep,
                PingedPeer {
                    expected_pubkey: Pubkey::new_unique(),
                    token: [0u8; 32],
                    good: false,
                },
            );
        }
        assert_eq!(table.len(), FD_REPAIR_PINGED_MAX);
        let fresh_ep = PeerEndpoint::new(std::net::Ipv4Addr::new(10, 0, 0, 1), 1, 1);
        assert_matches!(
            table.challenge(fresh_ep, Pubkey::new_unique(), &mut r),
            Err(RepairError::PingedTableFull)
        );
    }
}
