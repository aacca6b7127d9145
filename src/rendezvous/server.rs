use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};

use super::{Rendezvous, Request};
use crate::error::{Error, Result};

/// Rendezvous server over HTTP, or HTTPS when a certificate is set.
///
/// Every POSTed [`Request`] is held until its counterpart registers under
/// the same id, then both get a [`super::Response`].
pub struct Server {
    listener: TcpListener,
    rndz: Arc<Rendezvous>,
    tls: Option<(PathBuf, PathBuf)>,
}

impl Server {
    pub async fn new<A: ToSocketAddrs>(listen_addr: A) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;

        Ok(Self {
            listener,
            rndz: Default::default(),
            tls: None,
        })
    }

    /// serve HTTPS with a PEM certificate chain and private key
    pub fn with_tls(mut self, cert: Option<PathBuf>, key: Option<PathBuf>) -> Result<Self> {
        self.tls = match (cert, key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            _ => return Err(Error::Config("cert and key must be set together".into())),
        };
        Ok(self)
    }

    /// share a pairing table, e.g. one with a shorter timeout
    pub fn with_rendezvous(mut self, rndz: Arc<Rendezvous>) -> Self {
        self.rndz = rndz;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        let local_addr = self.listener.local_addr()?;
        let listener = self.listener.into_std()?;
        let app = router(self.rndz).into_make_service_with_connect_info::<SocketAddr>();

        match self.tls {
            None => {
                log::info!("listening http on {}", local_addr);
                axum_server::from_tcp(listener).serve(app).await?;
            }
            Some((cert, key)) => {
                let config = RustlsConfig::from_pem_file(cert, key).await?;
                log::info!("listening https on {}", local_addr);
                axum_server::from_tcp_rustls(listener, config)
                    .serve(app)
                    .await?;
            }
        }

        Ok(())
    }
}

pub(crate) fn router(rndz: Arc<Rendezvous>) -> Router {
    Router::new().fallback(handle_register).with_state(rndz)
}

async fn handle_register(
    State(rndz): State<Arc<Rendezvous>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> HttpResponse {
    let req: Request = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            log::debug!("[{}] bad request: {}", remote, e);
            return (StatusCode::BAD_REQUEST, format!("{}\n", e)).into_response();
        }
    };

    log::info!(
        "[{}] request: id {} nat {} endpoint {}",
        remote,
        req.id,
        req.nat,
        req.endpoint
    );

    let resp = match rndz.register(req).await {
        Ok(resp) => resp,
        Err(e) => {
            let (status, reason) = match e {
                Error::Conflict(reason) => (StatusCode::BAD_REQUEST, reason),
                Error::Timeout(reason) => (StatusCode::REQUEST_TIMEOUT, reason.to_string()),
                e => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            };
            log::info!("[{}] error: {}", remote, reason);
            return (status, format!("{}\n", reason)).into_response();
        }
    };

    match serde_json::to_vec(&resp) {
        Ok(body) => {
            log::info!(
                "[{}] response: nat {} endpoint {} was_first {}",
                remote,
                resp.nat,
                resp.endpoint,
                resp.was_first
            );
            ([(CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e)).into_response(),
    }
}

#[cfg(all(test, feature = "client"))]
mod tests {
    use super::*;
    use crate::nat::NatClass;
    use crate::rendezvous::Client;
    use std::time::Duration;

    async fn spawn_server(timeout: Duration) -> (String, Arc<Rendezvous>) {
        let rndz = Arc::new(Rendezvous::with_timeout(timeout));
        let server = Server::new("127.0.0.1:0")
            .await
            .unwrap()
            .with_rendezvous(rndz.clone());
        let url = format!("http://{}/", server.local_addr().unwrap());
        tokio::spawn(server.run());
        (url, rndz)
    }

    async fn wait_pending(rndz: &Rendezvous) {
        while rndz.pending() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_pair_over_http() {
        let (url, rndz) = spawn_server(Duration::from_secs(5)).await;

        let c1 = Client::new(&url).unwrap();
        let first = tokio::spawn(async move {
            c1.exchange(
                "link",
                NatClass::EndpointIndependent,
                &"192.0.2.1:1000".parse().unwrap(),
            )
            .await
        });
        wait_pending(&rndz).await;

        let c2 = Client::new(&url).unwrap();
        let second = c2
            .exchange(
                "link",
                NatClass::EndpointDependent,
                &"198.51.100.2".parse().unwrap(),
            )
            .await
            .unwrap();
        let first = first.await.unwrap().unwrap();

        assert!(first.was_first);
        assert_eq!(first.nat, NatClass::EndpointDependent);
        assert_eq!(first.endpoint.to_string(), "198.51.100.2");
        assert!(!second.was_first);
        assert_eq!(second.nat, NatClass::EndpointIndependent);
        assert_eq!(second.endpoint.to_string(), "192.0.2.1:1000");
    }

    #[tokio::test]
    async fn test_duplicate_gets_400() {
        let (url, rndz) = spawn_server(Duration::from_secs(5)).await;
        let endpoint = "192.0.2.1:1000".parse().unwrap();

        let c1 = Client::new(&url).unwrap();
        let pending = tokio::spawn(async move {
            c1.exchange("dup", NatClass::EndpointIndependent, &endpoint)
                .await
        });
        wait_pending(&rndz).await;

        let dup = Client::new(&url)
            .unwrap()
            .exchange("dup", NatClass::EndpointIndependent, &endpoint)
            .await;
        match dup {
            Err(Error::Rejected { status, reason }) => {
                assert_eq!(status, 400);
                assert!(reason.contains("already have"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rndz.pending(), 1);

        pending.abort();
    }

    #[tokio::test]
    async fn test_lone_request_gets_408() {
        let (url, _rndz) = spawn_server(Duration::from_millis(200)).await;

        let res = Client::new(&url)
            .unwrap()
            .exchange(
                "alone",
                NatClass::EndpointIndependent,
                &"192.0.2.1:1000".parse().unwrap(),
            )
            .await;
        assert!(matches!(res, Err(Error::Rejected { status: 408, .. })));
    }

    #[tokio::test]
    async fn test_malformed_body_gets_400() {
        let (url, _rndz) = spawn_server(Duration::from_secs(1)).await;

        let resp = reqwest::Client::new()
            .post(&url)
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn test_cert_and_key_together() {
        let server = Server::new("127.0.0.1:0").await.unwrap();
        assert!(matches!(
            server.with_tls(Some("cert.pem".into()), None),
            Err(Error::Config(_))
        ));
    }
}
