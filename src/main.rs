use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tokio::net::UdpSocket;
use tokio::time::interval;

use natlink::rendezvous::Server;
use natlink::Linker;

const KEEP_ALIVE: Duration = Duration::from_secs(5);

#[derive(StructOpt, Debug)]
#[structopt(name = "natlink")]
enum Opt {
    /// run the rendezvous service
    Server(ServerOpt),
    /// link with the peer registering the same id, then keep the path alive
    Peer(PeerOpt),
}

#[derive(StructOpt, Debug)]
struct ServerOpt {
    #[structopt(long = "listen-addr", env = "NATLINK_LISTEN_ADDR", default_value = "0.0.0.0:3999")]
    listen_addr: SocketAddr,

    /// PEM certificate chain, serve HTTPS together with --key
    #[structopt(long = "cert", env = "NATLINK_CERT", parse(from_os_str))]
    cert: Option<PathBuf>,

    #[structopt(long = "key", env = "NATLINK_KEY", parse(from_os_str))]
    key: Option<PathBuf>,
}

#[derive(StructOpt, Debug)]
struct PeerOpt {
    #[structopt(long = "id", env = "NATLINK_ID")]
    id: String,

    #[structopt(long = "stun1", env = "NATLINK_STUN1", default_value = "52.24.174.49:3478")]
    stun1: String,

    #[structopt(long = "stun2", env = "NATLINK_STUN2", default_value = "52.26.251.34:3478")]
    stun2: String,

    #[structopt(long = "rendezvous", env = "NATLINK_RENDEZVOUS")]
    rendezvous: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt: Opt = StructOpt::from_args();

    match opt {
        Opt::Server(opt) => run_server(opt).await,
        Opt::Peer(opt) => run_peer(opt).await,
    }
}

async fn run_server(opt: ServerOpt) -> Result<(), Box<dyn Error>> {
    let s = Server::new(opt.listen_addr)
        .await?
        .with_tls(opt.cert, opt.key)?;
    s.run().await?;
    Ok(())
}

async fn run_peer(opt: PeerOpt) -> Result<(), Box<dyn Error>> {
    let linker = Linker::new([opt.stun1, opt.stun2], &opt.rendezvous)?;
    let link = linker.link(&opt.id).await?;
    println!(
        "linked {} <-> {} ({:?})",
        link.socket.local_addr()?,
        link.peer,
        link.strategy
    );

    let socket = Arc::new(link.socket);
    let peer = link.peer;

    let rx = tokio::spawn(print_incoming(socket.clone()));

    tokio::select! {
        res = keep_alive(&socket, peer) => res?,
        res = rx => res??,
        _ = tokio::signal::ctrl_c() => {}
    }

    Ok(())
}

async fn keep_alive(socket: &UdpSocket, peer: SocketAddr) -> std::io::Result<()> {
    let mut ticker = interval(KEEP_ALIVE);
    let mut i = 0u64;
    loop {
        ticker.tick().await;
        let msg = format!("k/a {}", i);
        socket.send_to(msg.as_bytes(), peer).await?;
        println!("TX {} {}", peer, msg);
        i += 1;
    }
}

async fn print_incoming(socket: Arc<UdpSocket>) -> std::io::Result<()> {
    let mut buf = [0u8; 1536];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        println!("RX {} {}", from, String::from_utf8_lossy(&buf[..n]));
    }
}
