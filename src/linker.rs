use std::net::{Ipv4Addr, SocketAddr};

use crate::error::{Error, LinkError, Phase};
use crate::nat::{Classifier, MappedAddress, StunClient};
use crate::punch::{bind_udp, punch, Link, PunchConfig};
use crate::rendezvous::Client;

/// Links this host with whoever registers the same id at the rendezvous
/// service.
///
/// # example
/// ```no_run
/// use natlink::Linker;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let linker = Linker::new(
///     ["stun1.example.com:3478".into(), "stun2.example.com:3478".into()],
///     "https://rndz.example.com:3999/",
/// )?;
/// let link = linker.link("my-link").await?;
/// link.socket.send_to(b"hello", link.peer).await?;
/// # Ok(())
/// # }
/// ```
pub struct Linker<Q = StunClient> {
    classifier: Classifier<Q>,
    client: Client,
    punch: PunchConfig,
    bind_addr: SocketAddr,
}

impl Linker<StunClient> {
    pub fn new(stun_servers: [String; 2], rendezvous: &str) -> Result<Self, Error> {
        Self::with_query(StunClient::new(), stun_servers, rendezvous)
    }
}

impl<Q: MappedAddress> Linker<Q> {
    /// use another mapped address query in place of STUN
    pub fn with_query(query: Q, stun_servers: [String; 2], rendezvous: &str) -> Result<Self, Error> {
        Ok(Self {
            classifier: Classifier::new(query, stun_servers)?,
            client: Client::new(rendezvous)?,
            punch: PunchConfig::default(),
            bind_addr: (Ipv4Addr::UNSPECIFIED, 0).into(),
        })
    }

    pub fn punch_config(mut self, config: PunchConfig) -> Self {
        self.punch = config;
        self
    }

    /// local address of the classified socket, `0.0.0.0:0` by default
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Classify, exchange endpoints under `id`, then punch.
    ///
    /// Nothing is retried; call again to make a fresh attempt.
    pub async fn link(&self, id: &str) -> Result<Link, LinkError> {
        if id.trim().is_empty() {
            return Err(LinkError::new(
                Phase::Config,
                Error::Config("empty link id".into()),
            ));
        }

        let socket = bind_udp(self.bind_addr)
            .map_err(|e| LinkError::new(Phase::Classification, e.into()))?;

        let (my_nat, my_endpoint) = self
            .classifier
            .classify(&socket)
            .await
            .map_err(|e| LinkError::new(Phase::Classification, e))?;
        log::info!("me: {} {}", my_nat, my_endpoint);

        let peer = self
            .client
            .exchange(id, my_nat, &my_endpoint)
            .await
            .map_err(|e| LinkError::new(Phase::Rendezvous, e))?;
        log::info!("peer: {} {} (first: {})", peer.nat, peer.endpoint, peer.was_first);

        let link = punch(&self.punch, socket, my_nat, &peer)
            .await
            .map_err(|e| LinkError::new(Phase::Punching, e))?;
        log::info!("linked with {} via {:?}", link.peer, link.strategy);

        Ok(link)
    }
}
