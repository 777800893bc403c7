//! Repair protocol engine: peer-to-peer shred repair for a Solana-style
//! validator.
//!
//! The engine discovers and fetches missing shreds from peers over a
//! request/response protocol, tracking what's missing via a forest of
//! partially received slots and picking peers by stake and observed
//! quality. It is organized as a single-threaded reactive core (see
//! [`engine::RepairEngine`]) fed by plain function calls rather than
//! owning any network sockets or threads itself; embedders supply those
//! through the [`capabilities::RepairIo`] trait.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod fec_tracker;
pub mod forest;
pub mod metrics;
pub mod peer_cache;
pub mod peer_table;
pub mod ping_pong;
pub mod scheduler;
pub mod server;
pub mod sticky;
pub mod types;
pub mod wire;

pub mod engine;

pub use engine::{RepairEngine, ShredNotification};
pub use error::{RepairError, Result};
