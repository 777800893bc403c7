use thiserror::Error;

/// Errors surfaced by the repair engine's hard core.
///
/// Mirrors `ledger::shred::ShredError`'s shape: one flat enum, `thiserror`
/// messages, `#[from]` for the handful of conversions that are always
/// unambiguous.
#[derive(Error, Debug)]
pub enum RepairError {
    #[error("packet too short: need at least {need} bytes, got {got}")]
    PacketTooShort { need: usize, got: usize },

    #[error("unknown message discriminant {0}")]
    UnknownDiscriminant(u32),

    #[error("failed to decode message body: {0}")]
    Decode(#[from] bincode::Error),

    #[error("signature verification failed")]
    BadSignature,

    #[error("pinged-peer table is full")]
    PingedTableFull,

    #[error("active peer table is full")]
    PeerTableFull,

    #[error("pending request table is full")]
    PendingTableFull,

    #[error("forest element pool is exhausted")]
    ForestPoolExhausted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RepairError>;
