use reqwest::{StatusCode, Url};
use std::io;
use std::time::Duration;

use super::{Request, Response};
use crate::error::{Error, Result};
use crate::nat::{Endpoint, NatClass};

// above the server side pairing timeout, so its 408 reaches us first
const REQUEST_TIMEOUT: Duration = Duration::from_secs(70);

/// Rendezvous client
///
/// One POST per exchange, no retries.
///
/// # example
/// ```no_run
/// use natlink::rendezvous::Client;
/// use natlink::NatClass;
///
/// # async fn demo() -> natlink::Result<()> {
/// let c = Client::new("https://rndz.example.com:3999/")?;
/// let peer = c
///     .exchange("my-link", NatClass::EndpointIndependent, &"203.0.113.5:40000".parse()?)
///     .await?;
/// println!("peer {} {} first {}", peer.nat, peer.endpoint, peer.was_first);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    server: Url,
}

impl Client {
    pub fn new(server: &str) -> Result<Self> {
        let server = Url::parse(server)
            .map_err(|e| Error::Config(format!("invalid rendezvous url {:?}: {}", server, e)))?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self { http, server })
    }

    pub fn server(&self) -> &Url {
        &self.server
    }

    /// Register under `id` and wait for the counterpart's class and endpoint.
    pub async fn exchange(&self, id: &str, nat: NatClass, endpoint: &Endpoint) -> Result<Response> {
        let req = Request {
            id: id.to_string(),
            nat,
            endpoint: *endpoint,
        };

        let resp = self
            .http
            .post(self.server.clone())
            .json(&req)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(transport)?;

        if status != StatusCode::OK {
            let reason = String::from_utf8_lossy(&body).trim_end().to_string();
            return Err(Error::Rejected {
                status: status.as_u16(),
                reason,
            });
        }

        serde_json::from_slice(&body).map_err(|e| Error::Malformed(e.to_string()))
    }
}

fn transport(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        return Error::Timeout("rendezvous request");
    }
    Error::Transport(io::Error::new(io::ErrorKind::Other, e))
}
