//! Rendezvous exchange.
//!
//! use `Client` to register with a rendezvous service and learn the counterpart.
//!
//! use `Server` to run the rendezvous service, `Rendezvous` is its pairing core.

use serde::{Deserialize, Serialize};

use crate::nat::{Endpoint, NatClass};

#[cfg(feature = "client")]
mod client;
#[cfg(feature = "client")]
pub use client::Client;

#[cfg(feature = "server")]
mod pairing;
#[cfg(feature = "server")]
pub use pairing::Rendezvous;

#[cfg(feature = "server")]
mod server;
#[cfg(feature = "server")]
pub use server::Server;

/// Body of a registration, POSTed as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub nat: NatClass,
    pub endpoint: Endpoint,
}

/// What one registrant learns about the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub nat: NatClass,
    pub endpoint: Endpoint,
    /// true for the registrant that arrived first
    pub was_first: bool,
}
