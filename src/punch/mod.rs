//! UDP hole punching.
//!
//! [`Strategy::select`] maps the local and peer NAT classes to one of three
//! punching algorithms, [`punch`] runs it and hands back the live socket.
//!
//! - both endpoint independent: [`symmetric`], each side probes the other's
//!   known endpoint, `was_first` decides who goes first.
//! - peer endpoint dependent: [`scan_peer`], probe random ports on the peer's
//!   IP until its fresh mapping answers.
//! - local endpoint dependent: [`scan_local`], open many local sockets toward
//!   the peer's fixed endpoint and keep the first one that hears back.
//! - both endpoint dependent: unsupported.

mod scan_local;
mod scan_peer;
mod symmetric;

pub use scan_local::{scan_local, ScanLocalConfig};
pub use scan_peer::{random_ports, scan_peer, ScanPeerConfig};
pub use symmetric::{symmetric, SymmetricConfig};

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::nat::{Endpoint, NatClass};
use crate::rendezvous::Response;

/// Timing and budgets of all three algorithms.
#[derive(Debug, Clone, Default)]
pub struct PunchConfig {
    pub symmetric: SymmetricConfig,
    pub scan_peer: ScanPeerConfig,
    pub scan_local: ScanLocalConfig,
}

/// Punching algorithm for one (local, peer) NAT class pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Symmetric,
    ScanPeer,
    ScanLocal,
}

impl Strategy {
    pub fn select(local: NatClass, peer: NatClass) -> Result<Self> {
        use NatClass::*;

        match (local, peer) {
            (EndpointIndependent, EndpointIndependent) => Ok(Strategy::Symmetric),
            (EndpointIndependent, EndpointDependent) => Ok(Strategy::ScanPeer),
            (EndpointDependent, EndpointIndependent) => Ok(Strategy::ScanLocal),
            (EndpointDependent, EndpointDependent) => Err(Error::UnsupportedPairing { local, peer }),
        }
    }
}

/// A punched path: the socket to use and where the peer answers.
#[derive(Debug)]
pub struct Link {
    pub socket: UdpSocket,
    pub peer: SocketAddr,
    pub strategy: Strategy,
}

/// Punch toward the peer described by the rendezvous response.
///
/// `socket` is the one classified as `local`. It becomes the link socket,
/// except for [`Strategy::ScanLocal`] where it is closed and one of the
/// freshly opened sockets wins.
pub async fn punch(
    config: &PunchConfig,
    socket: UdpSocket,
    local: NatClass,
    peer: &Response,
) -> Result<Link> {
    let strategy = Strategy::select(local, peer.nat)?;
    log::debug!("punching {} -> {} with {:?}", local, peer.nat, strategy);

    match strategy {
        Strategy::Symmetric => {
            let peer_addr = full_addr(&peer.endpoint)?;
            symmetric(&config.symmetric, &socket, peer_addr, peer.was_first).await?;
            Ok(Link {
                socket,
                peer: peer_addr,
                strategy,
            })
        }
        Strategy::ScanPeer => {
            let peer_addr = scan_peer(
                &config.scan_peer,
                &socket,
                peer.endpoint.ip(),
                random_ports(config.scan_peer.ports.clone()),
            )
            .await?;
            Ok(Link {
                socket,
                peer: peer_addr,
                strategy,
            })
        }
        Strategy::ScanLocal => {
            let peer_addr = full_addr(&peer.endpoint)?;
            drop(socket);
            let socket = scan_local(&config.scan_local, peer_addr).await?;
            Ok(Link {
                socket,
                peer: peer_addr,
                strategy,
            })
        }
    }
}

fn full_addr(endpoint: &Endpoint) -> Result<SocketAddr> {
    endpoint
        .socket_addr()
        .ok_or_else(|| Error::Malformed(format!("peer endpoint {} has no port", endpoint)))
}

/// non-blocking udp socket handed to tokio
pub(crate) fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    UdpSocket::from_std(socket.into())
}

pub(crate) async fn send_probe(socket: &UdpSocket, to: SocketAddr, msg: &str) -> Result<()> {
    socket
        .send_to(format!("probe {}", msg).as_bytes(), to)
        .await?;
    Ok(())
}

/// wait for any datagram, returns where it came from
pub(crate) async fn recv_probe(
    socket: &UdpSocket,
    wait: Duration,
    what: &'static str,
) -> Result<SocketAddr> {
    let mut buf = [0u8; 1536];
    match timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((_, from))) => Ok(from),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(Error::Timeout(what)),
    }
}
