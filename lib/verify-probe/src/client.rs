//! Probe requests, decoded echo responses and the client seam

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use verify_core::{Endpoint, Result};

use crate::tls::{ClientIdentity, TlsClientConfig};

/// How a response is accepted by an HTTP probe
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AcceptMode {
    /// Decode the echo body of the first response, redirects are not followed
    #[default]
    Exact,
    /// Follow redirects and decode the final response
    FollowRedirects,
    /// Report the status and headers of the first response without reading the body
    StatusOnly,
}

/// Overrides for how the probe reaches its target
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransportOverride {
    /// Name presented as TLS SNI and used as the request authority.
    /// Connections still go to the endpoint's address.
    pub server_name: Option<String>,
    /// Static name resolution entries
    pub resolve: Vec<(String, SocketAddr)>,
    pub connect_timeout: Option<Duration>,
    /// TLS settings that replace the request's own
    pub tls: Option<TlsClientConfig>,
}

impl TransportOverride {
    pub fn with_server_name(server_name: impl Into<String>) -> Self {
        Self {
            server_name: Some(server_name.into()),
            ..Default::default()
        }
    }
}

/// What to send to every endpoint of a dispatch
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeRequest {
    pub method: String,
    pub path: String,
    /// Host header; defaults to the URL authority (or the SNI name when overridden)
    pub host: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub tls: Option<TlsClientConfig>,
    pub transport: Option<TransportOverride>,
    pub accept: AcceptMode,
    /// Per-attempt timeout, overriding the client's policy
    pub timeout: Option<Duration>,
}

impl Default for ProbeRequest {
    fn default() -> Self {
        Self::get("/")
    }
}

impl ProbeRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            host: None,
            headers: BTreeMap::new(),
            tls: None,
            transport: None,
            accept: AcceptMode::Exact,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Trust `ca_pem` for the server certificate.
    /// An empty bundle means the server certificate is not verified.
    pub fn with_ca_cert(mut self, ca_pem: impl Into<Vec<u8>>) -> Self {
        let ca_pem = ca_pem.into();
        self.tls = Some(if ca_pem.is_empty() {
            TlsClientConfig::insecure()
        } else {
            TlsClientConfig::trusting(ca_pem)
        });
        self
    }

    /// Skip server certificate verification
    pub fn insecure(mut self) -> Self {
        self.tls = Some(TlsClientConfig::insecure());
        self
    }

    /// Present a client certificate; server verification stays as configured
    pub fn with_client_identity(mut self, identity: ClientIdentity) -> Self {
        let tls = self.tls.take().unwrap_or_else(TlsClientConfig::insecure);
        self.tls = Some(tls.with_identity(identity));
        self
    }

    /// Present `server_name` as SNI without verifying the server certificate
    pub fn with_sni(mut self, server_name: impl Into<String>) -> Self {
        let mut transport = self.transport.take().unwrap_or_default();
        transport.server_name = Some(server_name.into());
        transport.tls.get_or_insert_with(TlsClientConfig::insecure);
        self.transport = Some(transport);
        self
    }

    pub fn with_transport(mut self, transport: TransportOverride) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn accept(mut self, accept: AcceptMode) -> Self {
        self.accept = accept;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// TLS settings in effect: the transport override's when it has some
    pub fn effective_tls(&self) -> Option<&TlsClientConfig> {
        self.transport
            .as_ref()
            .and_then(|t| t.tls.as_ref())
            .or(self.tls.as_ref())
    }

    /// Request path, always starting with `/`
    pub fn normalized_path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }
}

/// Echo reported by the test server, plus what the transport saw
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProbeResponse {
    /// HTTP status; 0 for TCP probes
    pub status: u16,
    pub method: String,
    pub path: String,
    pub host: String,
    /// Identifier of the backend replica that answered
    pub origin: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct EchoBody {
    #[serde(default)]
    method: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    host: String,
    #[serde(default, rename = "originIdentifier", alias = "podName")]
    origin: String,
}

impl ProbeResponse {
    /// Decode the JSON echo body returned by the test server
    pub fn from_echo(status: u16, body: &[u8]) -> serde_json::Result<Self> {
        let echo: EchoBody = serde_json::from_slice(body)?;
        Ok(Self {
            status,
            method: echo.method,
            path: echo.path,
            host: echo.host,
            origin: echo.origin,
            headers: BTreeMap::new(),
        })
    }

    /// Whether the server saw the request that was sent and answered with `status`
    pub fn echoes(&self, status: u16, request: &ProbeRequest) -> bool {
        self.status == status
            && self.method == request.method
            && self.path == request.normalized_path()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Transport that sends one probe to one endpoint, retrying per its policy
#[async_trait]
pub trait ProbeClient: Send + Sync {
    /// Probe `endpoint`, making at most `attempts` attempts (at least one)
    async fn probe(
        &self,
        endpoint: &Endpoint,
        request: &ProbeRequest,
        attempts: u32,
    ) -> Result<ProbeResponse>;
}
