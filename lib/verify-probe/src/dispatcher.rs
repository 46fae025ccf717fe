//! Sequential, fail-fast probing of a resolved endpoint set

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};
use verify_core::{Endpoint, HarnessError, Result};

use crate::client::{ProbeClient, ProbeRequest, ProbeResponse};
use crate::http::HttpProbeClient;
use crate::tcp::TcpProbeClient;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "HTTP"),
            Protocol::Https => write!(f, "HTTPS"),
            Protocol::Tcp => write!(f, "TCP"),
        }
    }
}

/// Sends the same probe to each endpoint in order and checks every response
pub struct ProbeDispatcher {
    http: Arc<dyn ProbeClient>,
    tcp: Arc<dyn ProbeClient>,
}

impl Default for ProbeDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeDispatcher {
    pub fn new() -> Self {
        Self {
            http: Arc::new(HttpProbeClient::default()),
            tcp: Arc::new(TcpProbeClient::default()),
        }
    }

    /// Use custom transports, e.g. with different policies
    pub fn with_clients(http: Arc<dyn ProbeClient>, tcp: Arc<dyn ProbeClient>) -> Self {
        Self { http, tcp }
    }

    /// Probe every endpoint in order, making up to `retries` attempts each.
    ///
    /// HTTPS probes rewrite `http://` endpoints to `https://`. Stops at the first
    /// transport error or the first response `matcher` rejects; later endpoints are
    /// not probed.
    pub async fn dispatch<M>(
        &self,
        retries: u32,
        endpoints: &[Endpoint],
        protocol: Protocol,
        request: &ProbeRequest,
        mut matcher: M,
    ) -> Result<()>
    where
        M: FnMut(&ProbeResponse) -> bool,
    {
        let client = match protocol {
            Protocol::Http | Protocol::Https => &self.http,
            Protocol::Tcp => &self.tcp,
        };

        for endpoint in endpoints {
            let target = match protocol {
                Protocol::Https => endpoint.with_secure_scheme(),
                Protocol::Http | Protocol::Tcp => endpoint.clone(),
            };

            let response = client.probe(&target, request, retries).await?;
            info!("{} response received from {}: {:?}", protocol, target, response);

            if !matcher(&response) {
                warn!("{} response from {} failed to match", protocol, target);
                return Err(HarnessError::ProbeMatch {
                    endpoint: target.to_string(),
                });
            }
        }
        Ok(())
    }
}
