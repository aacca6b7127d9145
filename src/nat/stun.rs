use async_trait::async_trait;
use std::io::{Error, ErrorKind, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};

use super::MappedAddress;

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_RESPONSE: u16 = 0x0101;
const MAGIC_COOKIE: u32 = 0x2112_A442;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

const HEADER_LEN: usize = 20;

/// Minimal STUN binding client, just enough to learn the mapped address.
#[derive(Debug, Clone)]
pub struct StunClient {
    timeout: Duration,
}

impl Default for StunClient {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

impl StunClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// how long to wait for the binding response
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn resolve(socket: &UdpSocket, server: &str) -> Result<SocketAddr> {
        let local = socket.local_addr()?;
        let mut fallback = None;
        for addr in lookup_host(server).await? {
            if addr.is_ipv4() == local.is_ipv4() {
                return Ok(addr);
            }
            fallback.get_or_insert(addr);
        }

        fallback.ok_or_else(|| Error::new(ErrorKind::Other, "no addr"))
    }
}

#[async_trait]
impl MappedAddress for StunClient {
    async fn endpoint(&self, socket: &UdpSocket, server: &str) -> Result<SocketAddr> {
        let server_addr = Self::resolve(socket, server).await?;
        let tid: [u8; 12] = rand::random();

        socket.send_to(&binding_request(&tid), server_addr).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; 1500];
        loop {
            let (n, from) = timeout_at(deadline, socket.recv_from(&mut buf))
                .await
                .map_err(|_| Error::new(ErrorKind::TimedOut, "no stun response"))??;

            if from != server_addr {
                log::trace!("ignoring datagram from {} while waiting for {}", from, server_addr);
                continue;
            }

            match parse_binding_response(&buf[..n], &tid)? {
                Some(mapped) => {
                    log::debug!("{} maps us to {}", server, mapped);
                    return Ok(mapped);
                }
                None => continue,
            }
        }
    }
}

fn binding_request(tid: &[u8; 12]) -> Vec<u8> {
    let mut req = Vec::with_capacity(HEADER_LEN);
    req.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
    req.extend_from_slice(&0u16.to_be_bytes());
    req.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    req.extend_from_slice(tid);
    req
}

fn invalid(msg: &str) -> Error {
    Error::new(ErrorKind::InvalidData, msg.to_string())
}

/// `Ok(None)` for a well-formed message that belongs to another transaction.
fn parse_binding_response(data: &[u8], tid: &[u8; 12]) -> Result<Option<SocketAddr>> {
    if data.len() < HEADER_LEN {
        return Err(invalid("stun response too short"));
    }

    let magic = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if magic != MAGIC_COOKIE {
        return Err(invalid("invalid stun magic cookie"));
    }

    if &data[8..HEADER_LEN] != tid {
        return Ok(None);
    }

    let msg_type = u16::from_be_bytes([data[0], data[1]]);
    if msg_type != BINDING_RESPONSE {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("unexpected stun message type 0x{:04x}", msg_type),
        ));
    }

    let msg_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    if data.len() < HEADER_LEN + msg_len {
        return Err(invalid("stun response truncated"));
    }

    let attrs = &data[HEADER_LEN..HEADER_LEN + msg_len];
    let mut mapped = None;
    let mut offset = 0;
    while offset + 4 <= attrs.len() {
        let attr_type = u16::from_be_bytes([attrs[offset], attrs[offset + 1]]);
        let attr_len = u16::from_be_bytes([attrs[offset + 2], attrs[offset + 3]]) as usize;
        offset += 4;
        if offset + attr_len > attrs.len() {
            return Err(invalid("stun attribute truncated"));
        }
        let value = &attrs[offset..offset + attr_len];

        match attr_type {
            ATTR_XOR_MAPPED_ADDRESS => return parse_address(value, Some(tid)).map(Some),
            ATTR_MAPPED_ADDRESS => mapped = Some(parse_address(value, None)?),
            _ => {}
        }

        // attributes are padded to 4 bytes
        offset += (attr_len + 3) & !3;
    }

    mapped
        .map(Some)
        .ok_or_else(|| invalid("no mapped address in stun response"))
}

fn parse_address(value: &[u8], xor_with: Option<&[u8; 12]>) -> Result<SocketAddr> {
    if value.len() < 8 {
        return Err(invalid("stun address attribute too short"));
    }

    let cookie = MAGIC_COOKIE.to_be_bytes();
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    if xor_with.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }

    let ip = match value[1] {
        0x01 => {
            let mut octets = [value[4], value[5], value[6], value[7]];
            if xor_with.is_some() {
                for (o, k) in octets.iter_mut().zip(cookie.iter()) {
                    *o ^= k;
                }
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        0x02 => {
            if value.len() < 20 {
                return Err(invalid("stun ipv6 address too short"));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&value[4..20]);
            if let Some(tid) = xor_with {
                let key = cookie.iter().chain(tid.iter());
                for (o, k) in octets.iter_mut().zip(key) {
                    *o ^= k;
                }
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        family => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("unknown stun address family {}", family),
            ))
        }
    };

    Ok(SocketAddr::new(ip, port))
}
