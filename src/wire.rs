//! Wire codec & signer (spec §4.A).
//!
//! Layout: `[4-byte LE discriminant][64-byte Ed25519 signature][body]`.
//! The signature covers `discriminant || body` — the signature slot itself
//! is never part of what gets signed. Callers must not reorder the
//! write-discriminant / sign / splice-signature sequence; see spec §9's
//! "wire format quirk" note.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;

use crate::error::{RepairError, Result};
use crate::types::{Nonce, Slot, TimestampMs};

const DISCRIMINANT_LEN: usize = 4;
const SIGNATURE_LEN: usize = 64;
pub const HEADER_LEN: usize = DISCRIMINANT_LEN + SIGNATURE_LEN;

const DISC_WINDOW_INDEX: u32 = 0;
const DISC_HIGHEST_WINDOW_INDEX: u32 = 1;
const DISC_ORPHAN: u32 = 2;
const DISC_PING: u32 = 3;
const DISC_PONG: u32 = 4;

/// Common request header carried by all three client request kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestHeader {
    pub sender: Pubkey,
    pub recipient: Pubkey,
    pub timestamp_ms: TimestampMs,
    pub nonce: Nonce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowIndexRequest {
    pub header: RequestHeader,
    pub slot: Slot,
    pub shred_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighestWindowIndexRequest {
    pub header: RequestHeader,
    pub slot: Slot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanRequest {
    pub header: RequestHeader,
    pub slot: Slot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    pub from: Pubkey,
    pub token: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {
    pub from: Pubkey,
    pub hash: [u8; 32],
}

/// A fully framed, decoded message plus the signature that accompanied it.
#[derive(Debug, Clone)]
pub enum RepairMessage {
    WindowIndex(WindowIndexRequest),
    HighestWindowIndex(HighestWindowIndexRequest),
    Orphan(OrphanRequest),
    Ping(Ping),
    Pong(Pong),
}

impl RepairMessage {
    fn discriminant(&self) -> u32 {
        match self {
            RepairMessage::WindowIndex(_) => DISC_WINDOW_INDEX,
            RepairMessage::HighestWindowIndex(_) => DISC_HIGHEST_WINDOW_INDEX,
            RepairMessage::Orphan(_) => DISC_ORPHAN,
            RepairMessage::Ping(_) => DISC_PING,
            RepairMessage::Pong(_) => DISC_PONG,
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        Ok(match self {
            RepairMessage::WindowIndex(m) => bincode::serialize(m)?,
            RepairMessage::HighestWindowIndex(m) => bincode::serialize(m)?,
            RepairMessage::Orphan(m) => bincode::serialize(m)?,
            RepairMessage::Ping(m) => bincode::serialize(m)?,
            RepairMessage::Pong(m) => bincode::serialize(m)?,
        })
    }
}

/// Anything capable of producing an Ed25519 signature over a byte slice.
/// Kept separate from `RepairIo` so wire tests can plug in a bare keypair.
pub trait MessageSigner {
    fn sign(&self, message: &[u8]) -> Signature;
}

impl<T: solana_sdk::signer::Signer> MessageSigner for T {
    fn sign(&self, message: &[u8]) -> Signature {
        self.sign_message(message)
    }
}

/// Encodes `msg`, signing over `discriminant || body`, and returns the
/// fully framed datagram ready for transmission.
pub fn encode_and_sign(msg: &RepairMessage, signer: &dyn MessageSigner) -> Result<Vec<u8>> {
    let body = msg.encode_body()?;
    let mut signing_buf = Vec::with_capacity(DISCRIMINANT_LEN + body.len());
    signing_buf.extend_from_slice(&msg.discriminant().to_le_bytes());
    signing_buf.extend_from_slice(&body);

    let signature = signer.sign(&signing_buf);

    let mut framed = Vec::with_capacity(HEADER_LEN + body.len());
    framed.extend_from_slice(&msg.discriminant().to_le_bytes());
    framed.extend_from_slice(signature.as_ref());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Decoded datagram: the message plus the signature and the exact bytes
/// that were signed over, so the caller can verify against a claimed pubkey.
pub struct Decoded {
    pub message: RepairMessage,
    pub signature: Signature,
    pub signed_bytes: Vec<u8>,
}

/// Decodes a server-side (serve port) datagram: one of the three request
/// kinds, or a `pong` replying to a challenge this node issued. Unknown
/// discriminants or undersized frames are errors; the caller bumps a
/// corrupt-packet counter and drops the datagram.
pub fn decode_request(buf: &[u8]) -> Result<Decoded> {
    decode(buf, true)
}

/// Decodes a client-side (intake port) datagram: a `ping` challenge from a
/// server this node previously sent a request to. Callers are expected to
/// fall through to shred-with-trailing-nonce handling on error (spec
/// §4.A) rather than bump a counter.
pub fn decode_response(buf: &[u8]) -> Result<Decoded> {
    decode(buf, false)
}

fn decode(buf: &[u8], is_request: bool) -> Result<Decoded> {
    if buf.len() < HEADER_LEN {
        return Err(RepairError::PacketTooShort {
            need: HEADER_LEN,
            got: buf.len(),
        });
    }
    let disc = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let signature = Signature::try_from(&buf[4..HEADER_LEN]).map_err(|_| RepairError::BadSignature)?;
    let body = &buf[HEADER_LEN..];

    let message = if is_request {
        match disc {
            DISC_WINDOW_INDEX => RepairMessage::WindowIndex(bincode::deserialize(body)?),
            DISC_HIGHEST_WINDOW_INDEX => {
                RepairMessage::HighestWindowIndex(bincode::deserialize(body)?)
            }
            DISC_ORPHAN => RepairMessage::Orphan(bincode::deserialize(body)?),
            DISC_PONG => RepairMessage::Pong(bincode::deserialize(body)?),
            other => return Err(RepairError::UnknownDiscriminant(other)),
        }
    } else {
        match disc {
            DISC_PING => RepairMessage::Ping(bincode::deserialize(body)?),
            other => return Err(RepairError::UnknownDiscriminant(other)),
        }
    };

    let mut signed_bytes = Vec::with_capacity(DISCRIMINANT_LEN + body.len());
    signed_bytes.extend_from_slice(&disc.to_le_bytes());
    signed_bytes.extend_from_slice(body);

    Ok(Decoded {
        message,
        signature,
        signed_bytes,
    })
}

/// A raw shred response: payload bytes followed by a trailing 4-byte nonce
/// (spec §4.A — "not a self-describing framed message").
pub fn append_nonce(mut shred: Vec<u8>, nonce: Nonce) -> Vec<u8> {
    shred.extend_from_slice(&nonce.to_le_bytes());
    shred
}

/// Splits a datagram that failed request/response decode into `(payload,
/// nonce)`, on the assumption that it is a raw shred with a trailing nonce.
pub fn split_trailing_nonce(buf: &[u8]) -> Option<(&[u8], Nonce)> {
    if buf.len() < 4 {
        return None;
    }
    let (payload, nonce_bytes) = buf.split_at(buf.len() - 4);
    Some((payload, u32::from_le_bytes(nonce_bytes.try_into().unwrap())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use solana_sdk::signer::keypair::Keypair;
    use solana_sdk::signer::Signer;

    #[test]
    fn encode_decode_round_trip() {
        let keypair = Keypair::new();
        let sender = keypair.pubkey();
        let recipient = Pubkey::new_unique();
        let msg = RepairMessage::WindowIndex(WindowIndexRequest {
            header: RequestHeader {
                sender,
                recipient,
                timestamp_ms: 42,
                nonce: 7,
            },
            slot: 100,
            shred_index: 3,
        });

        let framed = encode_and_sign(&msg, &keypair).unwrap();
        let decoded = decode_request(&framed).unwrap();
        assert!(decoded.signature.verify(sender.as_ref(), &decoded.signed_bytes));

        match decoded.message {
            RepairMessage::WindowIndex(req) => {
                assert_eq!(req.slot, 100);
                assert_eq!(req.shred_index, 3);
                assert_eq!(req.header.nonce, 7);
            }
            _ => panic!("wrong variant decoded"),
        }
    }

    #[test]
    fn signing_twice_is_deterministic() {
        let keypair = Keypair::new();
        let msg = RepairMessage::Orphan(OrphanRequest {
            header: RequestHeader {
                sender: keypair.pubkey(),
                recipient: Pubkey::new_unique(),
                timestamp_ms: 1,
                nonce: 1,
            },
            slot: 9,
        });
        let a = encode_and_sign(&msg, &keypair).unwrap();
        let b = encode_and_sign(&msg, &keypair).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn short_packet_is_rejected() {
        let err = decode_request(&[1, 2, 3]).unwrap_err();
        assert_matches!(err, RepairError::PacketTooShort { .. });
    }

    #[test]
    fn unknown_discriminant_is_rejected() {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&99u32.to_le_bytes());
        let err = decode_request(&buf).unwrap_err();
        assert_matches!(err, RepairError::UnknownDiscriminant(99));
    }

    #[test]
    fn trailing_nonce_round_trip() {
        let shred = vec![9u8; 128];
        let framed = append_nonce(shred.clone(), 0xdead_beef);
        let (payload, nonce) = split_trailing_nonce(&framed).unwrap();
        assert_eq!(payload, shred.as_slice());
        assert_eq!(nonce, 0xdead_beef);
    }
}
