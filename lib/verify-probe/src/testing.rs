//! Local echo servers and fake probe clients for unit tests

use std::collections::HashSet;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HOST, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use verify_core::{Endpoint, HarnessError, Result};

use crate::client::{ProbeClient, ProbeRequest, ProbeResponse};
use crate::tls::{load_certificates, load_private_key};

pub(crate) const CA_PEM: &[u8] = include_bytes!("../testdata/ca.pem");
pub(crate) const CLIENT_CERT_PEM: &[u8] = include_bytes!("../testdata/client.pem");
pub(crate) const CLIENT_KEY_PEM: &[u8] = include_bytes!("../testdata/client.key");
const SERVER_CERT_PEM: &[u8] = include_bytes!("../testdata/server.pem");
const SERVER_KEY_PEM: &[u8] = include_bytes!("../testdata/server.key");

/// HTTP test server echoing the request as JSON.
/// `/redirect` answers 301 to `/target` and `/unavailable` always answers 503.
pub(crate) async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(echo))
                    .await;
            });
        }
    });
    addr
}

async fn echo(req: Request<Incoming>) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/redirect" => Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header(LOCATION, "/target")
            .body(Full::new(Bytes::new())),
        "/unavailable" => Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(Full::new(Bytes::from("no healthy upstream"))),
        path => {
            let host = req
                .headers()
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let body = serde_json::json!({
                "method": req.method().as_str(),
                "path": path,
                "host": host,
                "podName": "dep-1-web-abc",
            });
            Response::builder().body(Full::new(Bytes::from(body.to_string())))
        }
    };
    Ok(response.unwrap())
}

/// HTTP test server answering 503 to everything, counting requests
pub(crate) async fn spawn_unavailable_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let counter = counter.clone();
            tokio::spawn(async move {
                let service = service_fn(move |_req: Request<Incoming>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async {
                        Response::builder()
                            .status(StatusCode::SERVICE_UNAVAILABLE)
                            .body(Full::new(Bytes::from("upstream connect error")))
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    (addr, hits)
}

/// What a TLS test server does once the handshake completes
#[derive(Clone, Copy, Debug)]
pub(crate) enum TlsEcho {
    /// Serve the HTTP echo
    Http,
    /// Write a single line
    Line(&'static str),
}

/// TLS test server for `example.com`, `localhost` and `127.0.0.1`, signed by `CA_PEM`
pub(crate) struct TlsEchoServer {
    pub(crate) addr: SocketAddr,
    /// SNI sent by each completed handshake
    pub(crate) server_names: Arc<Mutex<Vec<Option<String>>>>,
}

impl TlsEchoServer {
    pub(crate) fn server_names(&self) -> Vec<Option<String>> {
        self.server_names.lock().unwrap().clone()
    }
}

fn server_config(require_client_cert: bool) -> Arc<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let certs = load_certificates(SERVER_CERT_PEM).unwrap();
    let key = load_private_key(SERVER_KEY_PEM).unwrap();
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap();

    let config = if require_client_cert {
        let mut roots = RootCertStore::empty();
        for cert in load_certificates(CA_PEM).unwrap() {
            roots.add(cert).unwrap();
        }
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .unwrap();
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .unwrap()
    } else {
        builder.with_no_client_auth().with_single_cert(certs, key).unwrap()
    };
    Arc::new(config)
}

pub(crate) async fn spawn_tls_echo_server(
    echo_mode: TlsEcho,
    require_client_cert: bool,
) -> TlsEchoServer {
    let acceptor = TlsAcceptor::from(server_config(require_client_cert));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_names = Arc::new(Mutex::new(Vec::new()));
    let seen = server_names.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let Ok(mut stream) = acceptor.accept(stream).await else {
                    return;
                };
                let sni = stream.get_ref().1.server_name().map(str::to_string);
                seen.lock().unwrap().push(sni);
                match echo_mode {
                    TlsEcho::Http => {
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service_fn(echo))
                            .await;
                    }
                    TlsEcho::Line(line) => {
                        let _ = stream.write_all(line.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    }
                }
            });
        }
    });
    TlsEchoServer { addr, server_names }
}

/// TCP test server writing `line` to every connection
pub(crate) async fn spawn_line_server(line: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let _ = stream.write_all(line.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

/// Answers with an echo of the request whose origin is the endpoint address.
/// Endpoints listed in `unreachable` fail with a transport error.
#[derive(Default)]
pub(crate) struct RecordingClient {
    pub(crate) probed: Mutex<Vec<Endpoint>>,
    pub(crate) unreachable: HashSet<Endpoint>,
}

impl RecordingClient {
    pub(crate) fn probed(&self) -> Vec<Endpoint> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProbeClient for RecordingClient {
    async fn probe(
        &self,
        endpoint: &Endpoint,
        request: &ProbeRequest,
        attempts: u32,
    ) -> Result<ProbeResponse> {
        self.probed.lock().unwrap().push(endpoint.clone());
        if self.unreachable.contains(endpoint) {
            return Err(HarnessError::ProbeTransport {
                endpoint: endpoint.to_string(),
                attempts: attempts.max(1),
                reason: "connection refused".to_string(),
            });
        }
        Ok(ProbeResponse {
            status: 200,
            method: request.method.clone(),
            path: request.normalized_path(),
            host: request.host.clone().unwrap_or_default(),
            origin: endpoint.to_string(),
            ..Default::default()
        })
    }
}

/// Answers every `every`-th probe from `secondary` and the rest from `primary`.
/// `every == 0` never answers from `secondary`. TCP clients echo only the origin.
pub(crate) struct SplitClient {
    pub(crate) primary: &'static str,
    pub(crate) secondary: &'static str,
    pub(crate) every: usize,
    pub(crate) calls: AtomicUsize,
    tcp: bool,
}

impl SplitClient {
    pub(crate) fn new(primary: &'static str, secondary: &'static str, every: usize) -> Self {
        Self {
            primary,
            secondary,
            every,
            calls: AtomicUsize::new(0),
            tcp: false,
        }
    }

    pub(crate) fn tcp(primary: &'static str, secondary: &'static str, every: usize) -> Self {
        Self {
            tcp: true,
            ..Self::new(primary, secondary, every)
        }
    }
}

#[async_trait]
impl ProbeClient for SplitClient {
    async fn probe(
        &self,
        _endpoint: &Endpoint,
        request: &ProbeRequest,
        _attempts: u32,
    ) -> Result<ProbeResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let origin = if self.every > 0 && n % self.every == 0 {
            self.secondary
        } else {
            self.primary
        };
        if self.tcp {
            return Ok(ProbeResponse {
                origin: origin.to_string(),
                ..Default::default()
            });
        }
        Ok(ProbeResponse {
            status: 200,
            method: request.method.clone(),
            path: request.normalized_path(),
            origin: origin.to_string(),
            ..Default::default()
        })
    }
}
