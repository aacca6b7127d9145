use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{channel, Receiver};
use tokio::task::JoinSet;
use tokio::time::sleep;

use super::{bind_udp, recv_probe, send_probe};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ScanLocalConfig {
    pub sockets: usize,
    pub wait: Duration,
}

impl Default for ScanLocalConfig {
    fn default() -> Self {
        Self {
            sockets: 256,
            wait: Duration::from_secs(30),
        }
    }
}

/// Reach an endpoint independent peer from behind an endpoint dependent NAT.
///
/// Opens `sockets` local sockets, each with its own external mapping, and
/// probes `peer` from all of them. The first socket that hears back is
/// claimed, confirms to the peer and is returned. All other sockets are
/// closed before this returns.
pub async fn scan_local(config: &ScanLocalConfig, peer: SocketAddr) -> Result<UdpSocket> {
    let bind_addr = match peer.ip() {
        IpAddr::V4(_) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
        IpAddr::V6(_) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
    };

    let claimed = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = channel(1);
    let mut workers = JoinSet::new();

    for i in 0..config.sockets {
        let tx = tx.clone();
        let claimed = claimed.clone();
        let wait = config.wait;

        workers.spawn(async move {
            match open_and_wait(i, bind_addr, peer, wait).await {
                Ok(socket) => {
                    if claimed
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        let _ = tx.send(Ok(socket)).await;
                    }
                }
                Err(e) if e.is_timeout() => {}
                Err(e) => {
                    log::debug!("socket {} failed: {}", i, e);
                    let _ = tx.send(Err(e)).await;
                }
            }
        });
    }
    drop(tx);
    log::debug!("opened {} ports toward {}", config.sockets, peer);

    let winner = first_winner(&mut rx, config.wait).await;

    // release every losing socket before handing out the winner
    workers.shutdown().await;
    drop(rx);

    let socket = winner?;
    send_probe(&socket, peer, "confirm").await?;
    log::debug!("{} won, confirmed to {}", socket.local_addr()?, peer);

    Ok(socket)
}

async fn first_winner(rx: &mut Receiver<Result<UdpSocket>>, wait: Duration) -> Result<UdpSocket> {
    let deadline = sleep(wait);
    tokio::pin!(deadline);

    let mut last_err = None;
    loop {
        tokio::select! {
            // a claimed winner beats a deadline firing at the same time
            biased;

            msg = rx.recv() => match msg {
                Some(Ok(socket)) => return Ok(socket),
                Some(Err(e)) => last_err = Some(e),
                None => return Err(last_err.unwrap_or(Error::Timeout("no socket heard from peer"))),
            },
            _ = &mut deadline => return Err(Error::Timeout("no socket heard from peer")),
        }
    }
}

async fn open_and_wait(
    i: usize,
    bind_addr: SocketAddr,
    peer: SocketAddr,
    wait: Duration,
) -> Result<UdpSocket> {
    let socket = bind_udp(bind_addr)?;
    send_probe(&socket, peer, &format!("open {}", i)).await?;
    recv_probe(&socket, wait, "no reply on socket").await?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_single_winner_returned_rest_closed() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let config = ScanLocalConfig {
            sockets: 256,
            wait: Duration::from_secs(5),
        };

        let peer_side = tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut buf = [0u8; 64];
            while seen.len() < 64 {
                let (_, from) = peer.recv_from(&mut buf).await.unwrap();
                if !seen.contains(&from) {
                    seen.push(from);
                }
            }

            let chosen = seen[32];
            peer.send_to(b"probe back", chosen).await.unwrap();

            loop {
                let (n, from) = peer.recv_from(&mut buf).await.unwrap();
                if &buf[..n] == b"probe confirm" {
                    assert_eq!(from, chosen);
                    break;
                }
            }
            (chosen, seen)
        });

        let socket = scan_local(&config, peer_addr).await.unwrap();
        let (chosen, seen) = peer_side.await.unwrap();
        assert_eq!(socket.local_addr().unwrap().port(), chosen.port());

        // losers' ports can be bound again
        let losers: HashSet<u16> = seen
            .iter()
            .map(|a| a.port())
            .filter(|p| *p != chosen.port())
            .take(8)
            .collect();
        for port in losers {
            UdpSocket::bind(("0.0.0.0", port)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_claimed_winner_beats_expired_deadline() {
        let (tx, mut rx) = channel(1);
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tx.send(Ok(socket)).await.unwrap();

        let won = first_winner(&mut rx, Duration::ZERO).await.unwrap();
        assert_eq!(won.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = ScanLocalConfig {
            sockets: 8,
            wait: Duration::from_millis(200),
        };

        let res = scan_local(&config, silent.local_addr().unwrap()).await;
        assert!(res.unwrap_err().is_timeout());
    }
}
