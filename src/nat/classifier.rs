use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use super::{Endpoint, NatClass};
use crate::error::{Error, Result};

/// Query for the externally observed address of a local socket.
///
/// One binding-style transaction against `server`, sent from `socket`.
#[async_trait]
pub trait MappedAddress: Send + Sync {
    async fn endpoint(&self, socket: &UdpSocket, server: &str) -> io::Result<SocketAddr>;
}

#[async_trait]
impl<T: MappedAddress + ?Sized> MappedAddress for &T {
    async fn endpoint(&self, socket: &UdpSocket, server: &str) -> io::Result<SocketAddr> {
        (**self).endpoint(socket, server).await
    }
}

/// Label the mapping behavior of a local socket by asking two servers
/// what they see.
pub struct Classifier<Q> {
    query: Q,
    servers: [String; 2],
}

impl<Q: MappedAddress> Classifier<Q> {
    /// servers must be two distinct addresses.
    pub fn new(query: Q, servers: [String; 2]) -> Result<Self> {
        for server in &servers {
            check_server(server)?;
        }
        if servers[0] == servers[1] {
            return Err(Error::Config(format!(
                "classification servers must differ, both are {}",
                servers[0]
            )));
        }

        Ok(Self { query, servers })
    }

    pub fn servers(&self) -> &[String; 2] {
        &self.servers
    }

    /// Both queries go out from `socket`, the mapping is only meaningful
    /// for one fixed local port.
    pub async fn classify(&self, socket: &UdpSocket) -> Result<(NatClass, Endpoint)> {
        let first = self.query_one(socket, &self.servers[0]).await?;
        let second = self.query_one(socket, &self.servers[1]).await?;

        if first == second {
            log::debug!("{} and {} agree on {}", self.servers[0], self.servers[1], first);
            Ok((NatClass::EndpointIndependent, first.into()))
        } else {
            log::debug!(
                "{} saw {}, {} saw {}",
                self.servers[0],
                first,
                self.servers[1],
                second
            );
            Ok((NatClass::EndpointDependent, Endpoint::ip_only(first.ip())))
        }
    }

    async fn query_one(&self, socket: &UdpSocket, server: &str) -> Result<SocketAddr> {
        self.query.endpoint(socket, server).await.map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                Error::Timeout("no mapped address response")
            } else {
                Error::Transport(e)
            }
        })
    }
}

/// `host:port` or a socket address, port non-zero
fn check_server(server: &str) -> Result<()> {
    if server.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }

    let bad = || Error::Config(format!("classification server {:?} is not host:port", server));
    let (host, port) = server.rsplit_once(':').ok_or_else(bad)?;
    if host.is_empty() || host.contains(':') || host.trim() != host {
        return Err(bad());
    }
    match port.parse::<u16>() {
        Ok(p) if p != 0 => Ok(()),
        _ => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct Scripted {
        answers: HashMap<&'static str, io::Result<SocketAddr>>,
        seen: Mutex<Vec<(SocketAddr, String)>>,
    }

    impl Scripted {
        fn new(a: io::Result<SocketAddr>, b: io::Result<SocketAddr>) -> Self {
            let mut answers = HashMap::new();
            answers.insert("stun-a:3478", a);
            answers.insert("stun-b:3478", b);
            Self {
                answers,
                seen: Default::default(),
            }
        }
    }

    #[async_trait]
    impl MappedAddress for Scripted {
        async fn endpoint(&self, socket: &UdpSocket, server: &str) -> io::Result<SocketAddr> {
            self.seen
                .lock()
                .unwrap()
                .push((socket.local_addr()?, server.to_string()));
            match self.answers.get(server) {
                Some(Ok(addr)) => Ok(*addr),
                Some(Err(e)) => Err(io::Error::new(e.kind(), e.to_string())),
                None => Err(io::Error::new(io::ErrorKind::NotFound, "unknown server")),
            }
        }
    }

    fn servers() -> [String; 2] {
        ["stun-a:3478".into(), "stun-b:3478".into()]
    }

    async fn socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    #[tokio::test]
    async fn test_identical_answers_are_independent() {
        let mapped: SocketAddr = "203.0.113.9:40000".parse().unwrap();
        let q = Scripted::new(Ok(mapped), Ok(mapped));
        let c = Classifier::new(&q, servers()).unwrap();
        let s = socket().await;

        let (nat, endpoint) = c.classify(&s).await.unwrap();
        assert_eq!(nat, NatClass::EndpointIndependent);
        assert_eq!(endpoint.socket_addr(), Some(mapped));

        let seen = q.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, s.local_addr().unwrap());
        assert_eq!(seen[1].0, s.local_addr().unwrap());
        assert_eq!(seen[0].1, "stun-a:3478");
        assert_eq!(seen[1].1, "stun-b:3478");
    }

    #[tokio::test]
    async fn test_different_ports_are_dependent() {
        let q = Scripted::new(
            Ok("203.0.113.9:40000".parse().unwrap()),
            Ok("203.0.113.9:40002".parse().unwrap()),
        );
        let c = Classifier::new(&q, servers()).unwrap();

        let (nat, endpoint) = c.classify(&socket().await).await.unwrap();
        assert_eq!(nat, NatClass::EndpointDependent);
        assert_eq!(endpoint.ip(), "203.0.113.9".parse::<std::net::IpAddr>().unwrap());
        assert_eq!(endpoint.port(), None);
    }

    #[tokio::test]
    async fn test_different_ips_are_dependent() {
        let q = Scripted::new(
            Ok("203.0.113.9:40000".parse().unwrap()),
            Ok("203.0.113.10:40000".parse().unwrap()),
        );
        let c = Classifier::new(&q, servers()).unwrap();

        let (nat, endpoint) = c.classify(&socket().await).await.unwrap();
        assert_eq!(nat, NatClass::EndpointDependent);
        assert_eq!(endpoint.to_string(), "203.0.113.9");
    }

    #[tokio::test]
    async fn test_query_failure_propagates() {
        let q = Scripted::new(
            Ok("203.0.113.9:40000".parse().unwrap()),
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
        );
        let c = Classifier::new(&q, servers()).unwrap();
        match c.classify(&socket().await).await {
            Err(Error::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused),
            other => panic!("unexpected {:?}", other),
        }

        let q = Scripted::new(
            Err(io::Error::new(io::ErrorKind::TimedOut, "slow")),
            Ok("203.0.113.9:40000".parse().unwrap()),
        );
        let c = Classifier::new(&q, servers()).unwrap();
        assert!(c.classify(&socket().await).await.unwrap_err().is_timeout());
        // the second server is never asked after the first fails
        assert_eq!(q.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_servers_must_differ() {
        let q = Scripted::new(
            Ok("203.0.113.9:1".parse().unwrap()),
            Ok("203.0.113.9:1".parse().unwrap()),
        );
        assert!(matches!(
            Classifier::new(&q, ["a:1".into(), "a:1".into()]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Classifier::new(&q, ["".into(), "a:1".into()]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_servers_need_host_and_port() {
        let q = Scripted::new(
            Ok("203.0.113.9:1".parse().unwrap()),
            Ok("203.0.113.9:1".parse().unwrap()),
        );
        for bad in ["no-port-here", "also bad", ":3478", "stun:", "stun:0", "stun:70000", "::1"] {
            assert!(
                matches!(
                    Classifier::new(&q, [bad.into(), "stun-b:3478".into()]),
                    Err(Error::Config(_))
                ),
                "{} accepted",
                bad
            );
        }

        for good in ["stun.example.com:3478", "192.0.2.1:3478", "[2001:db8::1]:3478"] {
            assert!(Classifier::new(&q, [good.into(), "stun-b:3478".into()]).is_ok());
        }
    }
}
