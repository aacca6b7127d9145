use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot::{self, Receiver, Sender};
use tokio::time::timeout;

use super::{Request, Response};
use crate::error::{Error, Result};
use crate::nat::{Endpoint, NatClass};

const PAIRING_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct PeerInfo {
    nat: NatClass,
    endpoint: Endpoint,
}

struct Slot {
    serial: u64,
    identity: Endpoint,
    // mailbox read by the first registrant
    to_first: Option<Sender<PeerInfo>>,
    // mailbox filled by the first registrant
    from_first: Option<Receiver<PeerInfo>>,
}

enum Role {
    First { serial: u64, rx: Receiver<PeerInfo> },
    Second { rx: Receiver<PeerInfo> },
}

/// Two-party barrier keyed by rendezvous id.
///
/// The first registrant for an id creates a slot and waits; the second,
/// coming from a different endpoint, completes it and both learn about each
/// other. The slot is removed when the first registrant's wait ends, so the
/// id can be paired again.
pub struct Rendezvous {
    slots: Mutex<HashMap<String, Slot>>,
    count: AtomicU64,
    timeout: Duration,
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::with_timeout(PAIRING_TIMEOUT)
    }
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// how long a registrant waits for its counterpart
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            slots: Default::default(),
            count: AtomicU64::new(0),
            timeout,
        }
    }

    /// number of ids with a registrant waiting
    pub fn pending(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Register and wait for the counterpart.
    ///
    /// Fails with [`Error::Conflict`] if the id is already held by the same
    /// endpoint, or already paired, and with [`Error::Timeout`] if nobody
    /// shows up in time.
    pub async fn register(&self, req: Request) -> Result<Response> {
        let me = PeerInfo {
            nat: req.nat,
            endpoint: req.endpoint,
        };

        match self.enter(&req.id, me)? {
            Role::First { serial, mut rx } => {
                log::debug!("{} waiting on {}", req.endpoint, req.id);
                let guard = SlotGuard {
                    rndz: self,
                    id: &req.id,
                    serial,
                };

                let res = timeout(self.timeout, &mut rx).await;
                drop(guard);

                let peer = match res {
                    Ok(Ok(peer)) => peer,
                    // the counterpart may have arrived right before the slot went away
                    _ => rx
                        .try_recv()
                        .map_err(|_| Error::Timeout("no peer within timeout"))?,
                };
                Ok(Self::response(peer, true))
            }
            Role::Second { rx } => {
                log::debug!("{} joining {}", req.endpoint, req.id);
                match timeout(self.timeout, rx).await {
                    Ok(Ok(peer)) => Ok(Self::response(peer, false)),
                    _ => Err(Error::Timeout("no peer within timeout")),
                }
            }
        }
    }

    fn response(peer: PeerInfo, was_first: bool) -> Response {
        Response {
            nat: peer.nat,
            endpoint: peer.endpoint,
            was_first,
        }
    }

    fn enter(&self, id: &str, me: PeerInfo) -> Result<Role> {
        let mut slots = self.slots.lock().unwrap();

        let slot = match slots.get_mut(id) {
            Some(slot) => slot,
            None => {
                let (to_first, rx) = oneshot::channel();
                let (tx, from_first) = oneshot::channel();
                let identity = me.endpoint;
                let _ = tx.send(me);

                let serial = self.count.fetch_add(1, Relaxed) + 1;
                slots.insert(
                    id.to_string(),
                    Slot {
                        serial,
                        identity,
                        to_first: Some(to_first),
                        from_first: Some(from_first),
                    },
                );
                return Ok(Role::First { serial, rx });
            }
        };

        if slot.identity == me.endpoint {
            log::debug!("duplicate registration {} for {}", me.endpoint, id);
            return Err(Error::Conflict(format!(
                "already have id {} endpoint {}",
                id, me.endpoint
            )));
        }

        match (slot.to_first.take(), slot.from_first.take()) {
            (Some(tx), Some(rx)) => {
                let _ = tx.send(me);
                Ok(Role::Second { rx })
            }
            _ => Err(Error::Conflict(format!("id {} is already paired", id))),
        }
    }

    fn remove(&self, id: &str, serial: u64) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get(id) {
            if slot.serial == serial {
                slots.remove(id);
            }
        }
    }
}

/// Removes the first registrant's slot however its wait ends, including
/// the request being dropped mid-wait.
struct SlotGuard<'a> {
    rndz: &'a Rendezvous,
    id: &'a str,
    serial: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.rndz.remove(self.id, self.serial);
    }
}
