//! NAT mapping classification.
//!
//! use `Classifier` to label a local socket's mapping behavior.
//!
//! use `StunClient` as the mapped address query against public STUN servers.

mod classifier;
pub use classifier::{Classifier, MappedAddress};

mod stun;
pub use stun::StunClient;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::Error;

/// Mapping behavior of a NAT as seen from one local socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NatClass {
    /// Same external address for every destination ("EIM").
    EndpointIndependent,
    /// External port changes per destination ("EDM").
    EndpointDependent,
}

impl From<NatClass> for u8 {
    fn from(nat: NatClass) -> u8 {
        match nat {
            NatClass::EndpointIndependent => 1,
            NatClass::EndpointDependent => 2,
        }
    }
}

impl TryFrom<u8> for NatClass {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(NatClass::EndpointIndependent),
            2 => Ok(NatClass::EndpointDependent),
            _ => Err(format!("unknown nat class {}", v)),
        }
    }
}

impl fmt::Display for NatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NatClass::EndpointIndependent => f.write_str("EIM"),
            NatClass::EndpointDependent => f.write_str("EDM"),
        }
    }
}

/// External address of a peer, port known only when it is stable.
///
/// Text form is `IP:port`, or just `IP` when the port is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    ip: IpAddr,
    port: Option<u16>,
}

impl Endpoint {
    /// port 0 is treated as absent.
    pub fn new(ip: IpAddr, port: Option<u16>) -> Self {
        Self {
            ip,
            port: port.filter(|p| *p != 0),
        }
    }

    pub fn ip_only(ip: IpAddr) -> Self {
        Self { ip, port: None }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// full socket address, if the port is known
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.port.map(|port| SocketAddr::new(self.ip, port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), Some(addr.port()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.socket_addr() {
            Some(addr) => fmt::Display::fmt(&addr, f),
            None => fmt::Display::fmt(&self.ip, f),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(addr.into());
        }

        s.parse::<IpAddr>()
            .map(Endpoint::ip_only)
            .map_err(|_| Error::Malformed(format!("invalid endpoint {:?}", s)))
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_endpoint_text_form() {
        let ip: IpAddr = Ipv4Addr::new(203, 0, 113, 7).into();
        assert_eq!(Endpoint::new(ip, Some(4000)).to_string(), "203.0.113.7:4000");
        assert_eq!(Endpoint::ip_only(ip).to_string(), "203.0.113.7");

        let ip6: IpAddr = Ipv6Addr::LOCALHOST.into();
        assert_eq!(Endpoint::new(ip6, Some(80)).to_string(), "[::1]:80");
        assert_eq!(Endpoint::ip_only(ip6).to_string(), "::1");
    }

    #[test]
    fn test_endpoint_parse() {
        let e: Endpoint = "198.51.100.1:3478".parse().unwrap();
        assert_eq!(e.port(), Some(3478));

        let e: Endpoint = "198.51.100.1".parse().unwrap();
        assert_eq!(e.port(), None);
        assert_eq!(e.socket_addr(), None);

        let e: Endpoint = "198.51.100.1:0".parse().unwrap();
        assert_eq!(e.port(), None);

        assert!("not-an-ip".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_nat_class_wire_values() {
        assert_eq!(serde_json::to_string(&NatClass::EndpointIndependent).unwrap(), "1");
        assert_eq!(serde_json::to_string(&NatClass::EndpointDependent).unwrap(), "2");
        assert_eq!(
            serde_json::from_str::<NatClass>("2").unwrap(),
            NatClass::EndpointDependent
        );
        assert!(serde_json::from_str::<NatClass>("3").is_err());
    }
}
