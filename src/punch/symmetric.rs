use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::sleep;

use super::{recv_probe, send_probe};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SymmetricConfig {
    /// acceptor delay so the initiator's probe opens its NAT first
    pub settle: Duration,
    pub wait: Duration,
}

impl Default for SymmetricConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(250),
            wait: Duration::from_secs(1),
        }
    }
}

/// Punch between two endpoint independent NATs.
///
/// The initiator (`was_first`) probes right away, waits for the acceptor's
/// probe and confirms. The acceptor waits `settle`, probes, and takes any
/// inbound datagram as confirmation.
pub async fn symmetric(
    config: &SymmetricConfig,
    socket: &UdpSocket,
    peer: SocketAddr,
    was_first: bool,
) -> Result<()> {
    if was_first {
        send_probe(socket, peer, "open").await?;
        log::debug!("opened port toward {}", peer);

        let from = recv_probe(socket, config.wait, "no probe from peer").await?;
        log::debug!("probe from {}", from);

        send_probe(socket, peer, "confirm").await?;
        log::debug!("confirmed to {}", peer);
    } else {
        sleep(config.settle).await;

        let t0 = Instant::now();
        send_probe(socket, peer, "probe").await?;
        log::debug!("probed {}", peer);

        let from = recv_probe(socket, config.wait, "no confirmation from peer").await?;
        log::debug!("confirmation from {} in {:?}", from, t0.elapsed());
    }

    Ok(())
}
