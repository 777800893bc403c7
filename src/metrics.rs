//! Counters struct (spec §7 error table, ambient "Metrics" section of
//! `SPEC_FULL.md`). Mirrors `ServeRepairStats`/`RepairStats`: a
//! `Default`-derived bag of `u64` counters, snapshotted and logged
//! periodically by the engine rather than pushed to a concrete backend.

use log::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct RepairMetrics {
    pub recv_clnt_pkt: u64,
    pub recv_serv_pkt: u64,
    pub recv_serv_corrupt_pkt: u64,
    pub recv_serv_invalid_signature: u64,
    pub recv_serv_full_ping_table: u64,
    pub recv_serv_full_peer_table: u64,
    pub send_pkt_cnt: u64,
    pub serv_shred_miss_cnt: u64,
    pub pending_table_full: u64,
    pub forest_pool_exhausted: u64,
    pub blind_complete_cnt: u64,
    pub explicit_complete_cnt: u64,
}

impl RepairMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs the current snapshot at `info` level, matching
    /// `RepairService::run`'s "print stats every couple seconds" style.
    pub fn log_snapshot(&self) {
        info!(
            "repair_stats: recv_clnt={} recv_serv={} corrupt={} bad_sig={} \
             full_ping={} full_peer={} sent={} shred_miss={} pending_full={} \
             forest_exhausted={} blind_complete={} explicit_complete={}",
            self.recv_clnt_pkt,
            self.recv_serv_pkt,
            self.recv_serv_corrupt_pkt,
            self.recv_serv_invalid_signature,
            self.recv_serv_full_ping_table,
            self.recv_serv_full_peer_table,
            self.send_pkt_cnt,
            self.serv_shred_miss_cnt,
            self.pending_table_full,
            self.forest_pool_exhausted,
            self.blind_complete_cnt,
            self.explicit_complete_cnt,
        );
    }
}
