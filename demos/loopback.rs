//! Rendezvous server and two peers in one process, all on 127.0.0.1.
//!
//! Loopback has no NAT, so both peers answer the mapped address query with
//! their own socket address and end up endpoint independent.

use async_trait::async_trait;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use natlink::nat::MappedAddress;
use natlink::rendezvous::Server;
use natlink::Linker;

struct NoNat;

#[async_trait]
impl MappedAddress for NoNat {
    async fn endpoint(&self, socket: &UdpSocket, _server: &str) -> io::Result<SocketAddr> {
        socket.local_addr()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let server = Server::new("127.0.0.1:0").await?;
    let url = format!("http://{}/", server.local_addr()?);
    tokio::spawn(server.run());

    let stun = || ["none-1:3478".to_string(), "none-2:3478".to_string()];
    let local: SocketAddr = "127.0.0.1:0".parse()?;
    let alice = Linker::with_query(NoNat, stun(), &url)?.bind_addr(local);
    let bob = Linker::with_query(NoNat, stun(), &url)?.bind_addr(local);

    let (a, b) = tokio::join!(alice.link("demo"), bob.link("demo"));
    let (a, b) = (a?, b?);
    println!("alice {} -> {}", a.socket.local_addr()?, a.peer);
    println!("bob   {} -> {}", b.socket.local_addr()?, b.peer);

    a.socket.send_to(b"hello bob", a.peer).await?;

    let mut buf = [0u8; 1536];
    loop {
        let (n, from) = b.socket.recv_from(&mut buf).await?;
        let msg = String::from_utf8_lossy(&buf[..n]);
        // punching leftovers start with "probe"
        if msg.starts_with("probe") {
            continue;
        }
        println!("bob got {:?} from {}", msg, from);
        break;
    }

    Ok(())
}
