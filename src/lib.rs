//!Relay-free UDP links between two peers, each possibly behind a NAT.
//!
//!Two peers that agree on a link id out of band end up with a UDP socket each and
//!the address to reach the other, without any traffic relayed through a third party.
//!
//!## How natlink works
//!Each peer first asks two public STUN servers for the external address of the same
//!local socket. Equal answers mean the NAT keeps one mapping for every destination
//!(endpoint independent, EIM), different answers mean it opens a new port per
//!destination (endpoint dependent, EDM).
//!
//!Then both peers register the id, their class and their endpoint at a rendezvous
//!server. The first request is held until the second arrives, then each side gets
//!the other's details back.
//!
//!Last, both peers punch:
//!- EIM and EIM: probe each other's endpoint, the first registrant goes first.
//!- EIM toward EDM: scan random ports on the peer's IP until its fresh mapping answers.
//!- EDM toward EIM: open many local sockets toward the peer, keep the one that hears back.
//!- EDM and EDM: not supported.
//!
//!The returned [`Link`] holds the punched socket, keep using it for the peer.
//!
//!## Feature flags
//!Both halves are built by default. A peer only needs `client`, a rendezvous host only
//!needs `server`:
//!
//!```toml
//!natlink = { version = "0.1", default-features=false, features=["client"]}
//!```
//!
//!- `client`: rendezvous client and [`Linker`]
//!- `server`: rendezvous server

pub mod error;
pub mod nat;
pub mod punch;
pub mod rendezvous;

#[cfg(feature = "client")]
mod linker;

pub use error::{Error, LinkError, Phase, Result};
#[cfg(feature = "client")]
pub use linker::Linker;
pub use nat::{Endpoint, NatClass};
pub use punch::{Link, PunchConfig, Strategy};
