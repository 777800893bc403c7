//! Good-peer cache file (spec §4.H): persists the sticky set across
//! restarts, the only durable state the engine keeps.

use std::io::{BufRead, Write};
use std::net::Ipv4Addr;
use std::path::Path;

use log::warn;
use solana_sdk::pubkey::Pubkey;

use crate::error::Result;
use crate::types::PeerEndpoint;

/// One cached peer (pubkey, endpoint). The port is kept host-order in
/// memory; only the on-disk text form differs from the wire's
/// network-order representation (spec §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedPeer {
    pub pubkey: Pubkey,
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Serializes `peers` as `base58(pubkey)/dotted-ip/decimal-port` lines,
/// truncating and overwriting `path`.
pub fn write_cache(path: &Path, peers: &[CachedPeer]) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    for peer in peers {
        writeln!(
            file,
            "{}/{}/{}",
            bs58::encode(peer.pubkey.as_ref()).into_string(),
            peer.ip,
            peer.port
        )?;
    }
    Ok(())
}

/// Parses a previously written cache file, skipping malformed lines with
/// a warning rather than failing the whole load (spec §4.H).
pub fn read_cache(path: &Path) -> Result<Vec<CachedPeer>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut peers = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Some(peer) => peers.push(peer),
            None => warn!("skipping malformed good-peer cache line: {line:?}"),
        }
    }
    Ok(peers)
}

fn parse_line(line: &str) -> Option<CachedPeer> {
    let mut parts = line.splitn(3, '/');
    let pubkey_str = parts.next()?;
    let ip_str = parts.next()?;
    let port_str = parts.next()?;

    let bytes = bs58::decode(pubkey_str).into_vec().ok()?;
    let pubkey = Pubkey::try_from(bytes.as_slice()).ok()?;
    let ip: Ipv4Addr = ip_str.parse().ok()?;
    let port: u16 = port_str.parse().ok()?;
    Some(CachedPeer { pubkey, ip, port })
}

impl CachedPeer {
    pub fn endpoint(&self, intake_port: u16) -> PeerEndpoint {
        PeerEndpoint::new(self.ip, intake_port, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trips_a_cache_file() {
        let file = NamedTempFile::new().unwrap();
        let peers = vec![
            CachedPeer {
                pubkey: Pubkey::new_unique(),
                ip: Ipv4Addr::new(1, 2, 3, 4),
                port: 8001,
            },
            CachedPeer {
                pubkey: Pubkey::new_unique(),
                ip: Ipv4Addr::new(5, 6, 7, 8),
                port: 8002,
            },
        ];
        write_cache(file.path(), &peers).unwrap();
        let read_back = read_cache(file.path()).unwrap();
        assert_eq!(read_back, peers);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not-a-valid-line\n\n").unwrap();
        let read_back = read_cache(file.path()).unwrap();
        assert!(read_back.is_empty());
    }

    #[test]
    fn missing_file_yields_empty_cache() {
        let read_back = read_cache(Path::new("/nonexistent/path/to/cache")).unwrap();
        assert!(read_back.is_empty());
    }
}
