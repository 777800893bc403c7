//! Top-level reactive loop (spec §2): drains input channels and runs
//! periodic bookkeeping at the cadences spec §2 and §4 call out. This is
//! the one place that wires every other module together; everything
//! else in this crate is plain data and pure functions.

use std::net::Ipv4Addr;

use log::{debug, warn};
use rand::SeedableRng;
use rand_chacha::ChaChaRng;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;

use crate::capabilities::RepairIo;
use crate::config::RepairConfig;
use crate::error::Result;
use crate::fec_tracker::{FecTracker, ForceCompleteMessage};
use crate::forest::Forest;
use crate::metrics::RepairMetrics;
use crate::peer_cache::{self, CachedPeer};
use crate::peer_table::ActivePeerTable;
use crate::ping_pong::{self, PingedPeerTable};
use crate::scheduler::Scheduler;
use crate::server;
use crate::sticky::{self, StickyCursor};
use crate::types::{
    ContactInfo, PeerEndpoint, RepairKind, RepairRequest, Slot, StakeEntry, TimestampMs,
};
use crate::wire::{
    self, HighestWindowIndexRequest, OrphanRequest, Ping, RepairMessage, RequestHeader,
    WindowIndexRequest,
};

const SEND_TICK_MS: TimestampMs = 1;
const SHUFFLE_TICK_MS: TimestampMs = 15_000;
const STATS_TICK_MS: TimestampMs = 30_000;
const CACHE_TICK_MS: TimestampMs = 60_000;

/// A shred-tile notification (spec §6 "Shred notifications"): either a
/// freshly received shred or an out-of-band FEC-complete marker,
/// distinguished upstream by payload size.
pub enum ShredNotification {
    Data {
        slot: Slot,
        parent_off: u64,
        shred_index: u32,
        fec_set_index: u32,
        is_coding: bool,
        slot_complete: bool,
        signature: [u8; 64],
    },
    Coding {
        slot: Slot,
        fec_set_index: u32,
        data_cnt: u32,
    },
    FecComplete {
        slot: Slot,
        fec_set_index: u32,
        shred_index: u32,
    },
}

/// Adapts the [`RepairIo`] capability's `sign` method to [`wire::MessageSigner`].
struct IoSigner<'a>(&'a dyn RepairIo);

impl wire::MessageSigner for IoSigner<'_> {
    fn sign(&self, message: &[u8]) -> Signature {
        self.0.sign(message)
    }
}

pub struct RepairEngine {
    config: RepairConfig,
    io: Box<dyn RepairIo>,
    scheduler: Scheduler,
    peers: ActivePeerTable,
    sticky: Vec<Pubkey>,
    cursor: StickyCursor,
    pinged: PingedPeerTable,
    forest: Forest,
    fec_tracker: FecTracker,
    metrics: RepairMetrics,
    rng: ChaChaRng,
    now: TimestampMs,
    total_stake: u64,
    last_send_tick: TimestampMs,
    last_shuffle_tick: TimestampMs,
    last_stats_tick: TimestampMs,
    last_cache_tick: TimestampMs,
    pending_force_complete: Vec<ForceCompleteMessage>,
}

impl RepairEngine {
    pub fn new(config: RepairConfig, io: Box<dyn RepairIo>, root_slot: Slot, rng_seed: u64) -> Self {
        let fec_tracker = FecTracker::new(config.shred_tile_cnt);
        let mut engine = Self {
            scheduler: Scheduler::new(),
            peers: ActivePeerTable::new(),
            sticky: Vec::new(),
            cursor: StickyCursor::new(rng_seed),
            pinged: PingedPeerTable::new(),
            forest: Forest::new(root_slot),
            fec_tracker,
            metrics: RepairMetrics::new(),
            rng: ChaChaRng::seed_from_u64(rng_seed),
            now: 0,
            total_stake: 0,
            last_send_tick: 0,
            last_shuffle_tick: 0,
            last_stats_tick: 0,
            last_cache_tick: 0,
            pending_force_complete: Vec::new(),
            config,
            io,
        };
        engine.load_cache();
        engine
    }

    fn load_cache(&mut self) {
        match peer_cache::read_cache(&self.config.good_peer_cache_file) {
            Ok(peers) => {
                for cached in peers {
                    let endpoint = cached.endpoint(self.config.repair_intake_listen_port);
                    if let Err(e) = self.peers.upsert_contact(cached.pubkey, endpoint) {
                        warn!("failed to seed peer table from cache: {e}");
                    }
                }
            }
            Err(e) => warn!("could not read good-peer cache: {e}"),
        }
    }

    pub fn metrics(&self) -> &RepairMetrics {
        &self.metrics
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn sticky_peers(&self) -> &[Pubkey] {
        &self.sticky
    }

    pub fn pending_request_count(&self) -> usize {
        self.scheduler.pending_len()
    }

    pub fn peer_endpoint(&self, pubkey: &Pubkey) -> Option<PeerEndpoint> {
        self.peers.get(pubkey).map(|p| p.endpoint)
    }

    /// Sets the engine's notion of "now"; the core never reads the wall
    /// clock itself (spec §9).
    pub fn set_now(&mut self, now: TimestampMs) {
        self.now = now;
    }

    pub fn on_contact_info(&mut self, contacts: &[ContactInfo]) {
        for c in contacts {
            if let Err(e) = self.peers.upsert_contact(c.pubkey, c.endpoint) {
                warn!("dropping contact update: {e}");
            }
        }
    }

    pub fn on_stake_weights(&mut self, weights: &[StakeEntry]) {
        self.total_stake = self.peers.apply_stake_weights(weights);
    }

    /// A repair request forwarded from the replay stage (spec §6).
    pub fn request(&mut self, req: RepairRequest) -> Result<()> {
        self.scheduler.need(
            req.kind,
            req.slot,
            req.shred_index,
            self.now,
            &self.sticky,
            &self.peers,
            &mut self.cursor,
        )
    }

    /// Drains one datagram received on the intake (client) socket.
    pub fn on_intake_datagram(&mut self, from: PeerEndpoint, buf: &[u8]) {
        match wire::decode_response(buf) {
            Ok(decoded) => {
                if let RepairMessage::Ping(ping) = decoded.message {
                    self.metrics.recv_clnt_pkt += 1;
                    let pong = ping_pong::build_pong(self.io.identity(), &ping.token);
                    let signer = IoSigner(self.io.as_ref());
                    if let Ok(framed) = wire::encode_and_sign(&RepairMessage::Pong(pong), &signer) {
                        self.io.send_intake(from, &framed);
                    }
                }
            }
            Err(_) => {
                if let Some((payload, nonce)) = wire::split_trailing_nonce(buf) {
                    self.metrics.recv_clnt_pkt += 1;
                    if let Some(entry) = self.scheduler.match_response(nonce, self.now, &mut self.peers) {
                        self.io
                            .deliver_shred(entry.dup_key.slot, entry.dup_key.shred_index, payload);
                    }
                }
            }
        }
    }

    /// Drains one datagram received on the serve (server) socket.
    pub fn on_serve_datagram(&mut self, from: PeerEndpoint, buf: &[u8]) {
        let decoded = match wire::decode_request(buf) {
            Ok(d) => d,
            Err(_) => {
                self.metrics.recv_serv_corrupt_pkt += 1;
                return;
            }
        };
        self.metrics.recv_serv_pkt += 1;

        match decoded.message {
            RepairMessage::Pong(pong) => {
                self.pinged
                    .verify_pong(from, &pong, &decoded.signature, &decoded.signed_bytes);
            }
            RepairMessage::WindowIndex(req) => self.handle_request(
                from,
                RepairKind::WindowIndex,
                req.header,
                req.slot,
                Some(req.shred_index),
                &decoded.signature,
                &decoded.signed_bytes,
            ),
            RepairMessage::HighestWindowIndex(req) => self.handle_request(
                from,
                RepairKind::HighestWindowIndex,
                req.header,
                req.slot,
                None,
                &decoded.signature,
                &decoded.signed_bytes,
            ),
            RepairMessage::Orphan(req) => self.handle_request(
                from,
                RepairKind::Orphan,
                req.header,
                req.slot,
                None,
                &decoded.signature,
                &decoded.signed_bytes,
            ),
            RepairMessage::Ping(_) => {
                self.metrics.recv_serv_corrupt_pkt += 1;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_request(
        &mut self,
        from: PeerEndpoint,
        kind: RepairKind,
        header: RequestHeader,
        slot: Slot,
        shred_index: Option<u32>,
        signature: &Signature,
        signed_bytes: &[u8],
    ) {
        if header.recipient != self.io.identity() {
            self.metrics.recv_serv_corrupt_pkt += 1;
            server::warn_dropped("recipient mismatch", &header.sender);
            return;
        }
        if !signature.verify(header.sender.as_ref(), signed_bytes) {
            self.metrics.recv_serv_invalid_signature += 1;
            server::warn_dropped("invalid signature", &header.sender);
            return;
        }
        if !self.pinged.is_good(from, &header.sender) {
            match self.pinged.challenge(from, header.sender, &mut self.rng) {
                Ok(token) => {
                    let ping = RepairMessage::Ping(Ping {
                        from: self.io.identity(),
                        token,
                    });
                    let signer = IoSigner(self.io.as_ref());
                    if let Ok(framed) = wire::encode_and_sign(&ping, &signer) {
                        self.io.send_serve(from, &framed);
                    }
                }
                Err(_) => self.metrics.recv_serv_full_ping_table += 1,
            }
            return;
        }

        match kind {
            RepairKind::WindowIndex => server::handle_window_index(
                self.io.as_ref(),
                &mut self.metrics,
                from,
                slot,
                shred_index.unwrap_or(0),
                header.nonce,
            ),
            RepairKind::HighestWindowIndex => server::handle_highest_window_index(
                self.io.as_ref(),
                &mut self.metrics,
                from,
                slot,
                header.nonce,
            ),
            RepairKind::Orphan => {
                server::handle_orphan(self.io.as_ref(), &mut self.metrics, from, slot, header.nonce)
            }
        }
    }

    /// A notification from the shred tile (spec §6).
    pub fn on_shred_notification(&mut self, note: ShredNotification) {
        match note {
            ShredNotification::Data {
                slot,
                parent_off,
                shred_index,
                fec_set_index,
                is_coding,
                slot_complete,
                signature,
            } => {
                if !is_coding {
                    if let Err(e) =
                        self.forest
                            .insert_data_shred(slot, parent_off, shred_index, fec_set_index, slot_complete)
                    {
                        warn!("forest insert failed: {e}");
                        self.metrics.forest_pool_exhausted += 1;
                        return;
                    }
                    self.fec_tracker
                        .record_data_shred(slot, fec_set_index, parent_off, signature);
                    self.try_blind_complete(slot, fec_set_index);
                }
            }
            ShredNotification::Coding {
                slot,
                fec_set_index,
                data_cnt,
            } => {
                self.fec_tracker.record_coding_shred(slot, fec_set_index, data_cnt);
            }
            ShredNotification::FecComplete {
                slot,
                fec_set_index,
                shred_index,
            } => {
                let result = self
                    .fec_tracker
                    .handle_explicit_complete(slot, fec_set_index, shred_index, &mut self.forest);
                self.metrics.explicit_complete_cnt += 1;
                debug!(
                    "fec complete: slot={} fec_set_index={} data_cnt={}",
                    result.slot, result.fec_set_index, result.data_cnt
                );
            }
        }
    }

    fn try_blind_complete(&mut self, slot: Slot, fec_set_index: u32) {
        let Some(fec) = self.fec_tracker.get(slot, fec_set_index) else {
            return;
        };
        let Some(inferred) = FecTracker::should_force_complete(fec, &self.forest) else {
            return;
        };
        if let Some(msg) = self
            .fec_tracker
            .apply_force_complete(slot, fec_set_index, inferred)
        {
            self.metrics.blind_complete_cnt += 1;
            self.pending_force_complete.push(msg);
        }
    }

    /// Drains and returns any force-complete messages queued since the
    /// last call (spec §6 "output channels").
    pub fn take_force_complete_messages(&mut self) -> Vec<ForceCompleteMessage> {
        std::mem::take(&mut self.pending_force_complete)
    }

    /// Periodic bookkeeping: run once per loop iteration. Internally
    /// no-ops unless enough time has passed since the last tick of each
    /// kind (spec §2).
    pub fn drive(&mut self) {
        if self.now.saturating_sub(self.last_send_tick) >= SEND_TICK_MS {
            self.last_send_tick = self.now;
            self.drive_requests();
        }
        if self.now.saturating_sub(self.last_shuffle_tick) >= SHUFFLE_TICK_MS {
            self.last_shuffle_tick = self.now;
            self.sticky = sticky::shuffle(&mut self.peers, &self.sticky, self.total_stake, &mut self.rng);
        }
        if self.now.saturating_sub(self.last_stats_tick) >= STATS_TICK_MS {
            self.last_stats_tick = self.now;
            self.peers.decay_all();
            self.metrics.log_snapshot();
        }
        if self.now.saturating_sub(self.last_cache_tick) >= CACHE_TICK_MS {
            self.last_cache_tick = self.now;
            self.write_cache();
        }
    }

    /// Batch-send + expire + the forest re-request sweep (spec §4.D,
    /// and the "supplemented from original_source" re-emission decision
    /// recorded in DESIGN.md).
    fn drive_requests(&mut self) {
        for dup_key in self.scheduler.expire(self.now) {
            self.io.deliver_fail(dup_key.slot, dup_key.shred_index);
        }

        for out in self.scheduler.send_batch(&mut self.peers, self.now) {
            let Some(peer) = self.peers.get(&out.peer) else {
                continue;
            };
            let endpoint = peer.endpoint;
            let header = RequestHeader {
                sender: self.io.identity(),
                recipient: out.peer,
                timestamp_ms: self.now,
                nonce: out.nonce,
            };
            let message = match out.dup_key.kind {
                RepairKind::WindowIndex => RepairMessage::WindowIndex(WindowIndexRequest {
                    header,
                    slot: out.dup_key.slot,
                    shred_index: out.dup_key.shred_index,
                }),
                RepairKind::HighestWindowIndex => {
                    RepairMessage::HighestWindowIndex(HighestWindowIndexRequest {
                        header,
                        slot: out.dup_key.slot,
                    })
                }
                RepairKind::Orphan => RepairMessage::Orphan(OrphanRequest {
                    header,
                    slot: out.dup_key.slot,
                }),
            };
            let signer = IoSigner(self.io.as_ref());
            match wire::encode_and_sign(&message, &signer) {
                Ok(framed) => self.io.send_intake(endpoint, &framed),
                Err(e) => warn!("encode failure (programmer error): {e}"),
            }
        }

        let missing = self.forest.missing_shreds();
        for (slot, shred_index) in missing {
            if let Err(e) = self.scheduler.need(
                RepairKind::WindowIndex,
                slot,
                shred_index,
                self.now,
                &self.sticky,
                &self.peers,
                &mut self.cursor,
            ) {
                self.metrics.pending_table_full += 1;
                debug!("could not re-request {slot}:{shred_index}: {e}");
                break;
            }
        }
    }

    fn write_cache(&self) {
        let peers: Vec<CachedPeer> = self
            .sticky
            .iter()
            .filter_map(|pk| {
                self.peers.get(pk).map(|p| CachedPeer {
                    pubkey: *pk,
                    ip: p.endpoint.ip,
                    port: p.endpoint.serve_port,
                })
            })
            .collect();
        if let Err(e) = peer_cache::write_cache(&self.config.good_peer_cache_file, &peers) {
            warn!("failed to write good-peer cache: {e}");
        }
    }
}

/// Convenience constructor for a bare IPv4 loopback endpoint, used by
/// tests and simple embedders that don't yet track a dotted address.
pub fn loopback_endpoint(port: u16) -> PeerEndpoint {
    PeerEndpoint::new(Ipv4Addr::LOCALHOST, port, port)
}
