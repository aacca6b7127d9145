use rand::seq::SliceRandom;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::sleep;

use super::{recv_probe, send_probe};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ScanPeerConfig {
    /// delay so the peer's sockets are open before we start
    pub settle: Duration,
    pub chunk_probes: usize,
    pub total_probes: usize,
    /// listen time after each chunk
    pub chunk_wait: Duration,
    /// candidate ports on the peer's IP
    pub ports: RangeInclusive<u16>,
}

impl Default for ScanPeerConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(250),
            chunk_probes: 128,
            total_probes: 8192,
            chunk_wait: Duration::from_millis(500),
            ports: 1025..=u16::MAX,
        }
    }
}

/// Every port of `range` exactly once, in random order.
pub fn random_ports(range: RangeInclusive<u16>) -> impl Iterator<Item = u16> + Send {
    let mut ports: Vec<u16> = range.collect();
    ports.shuffle(&mut rand::thread_rng());
    ports.into_iter()
}

/// Find a peer behind an endpoint dependent NAT from an endpoint
/// independent one.
///
/// Probes go to `peer_ip` on ports taken from `ports`, `chunk_probes` at a
/// time, each chunk followed by a `chunk_wait` listen. The first datagram
/// that comes back reveals the peer's live endpoint; the peer's probes
/// toward our fixed endpoint have already opened the path.
pub async fn scan_peer<P>(
    config: &ScanPeerConfig,
    socket: &UdpSocket,
    peer_ip: IpAddr,
    mut ports: P,
) -> Result<SocketAddr>
where
    P: Iterator<Item = u16>,
{
    sleep(config.settle).await;

    let mut sent = 0;
    while sent < config.total_probes {
        let t0 = Instant::now();
        let chunk = config.chunk_probes.min(config.total_probes - sent);

        let mut n = 0;
        for port in ports.by_ref().take(chunk) {
            let dst = SocketAddr::new(peer_ip, port);
            send_probe(socket, dst, &format!("scan {}", sent + n)).await?;
            n += 1;
        }
        if n == 0 {
            log::debug!("ran out of ports after {} probes", sent);
            break;
        }
        sent += n;
        log::trace!("sent {} probes to {}, {} total", n, peer_ip, sent);

        match recv_probe(socket, config.chunk_wait, "no reply to chunk").await {
            Ok(from) => {
                log::debug!("reply from {} in {:?} after {} probes", from, t0.elapsed(), sent);
                return Ok(from);
            }
            Err(e) if e.is_timeout() => continue,
            Err(e) => return Err(e),
        }
    }

    Err(Error::Timeout("peer never answered the port scan"))
}
