//! TCP probes, optionally wrapped in TLS
//!
//! The test server writes one JSON echo line per connection.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;
use verify_core::{Endpoint, HarnessError, Result};

use crate::client::{ProbeClient, ProbeRequest, ProbeResponse};
use crate::policy::{AttemptOutcome, RetryPolicy, TimeoutPolicy};

#[derive(Clone, Debug, Default)]
pub struct TcpProbeClient {
    timeouts: TimeoutPolicy,
    retry: RetryPolicy,
}

impl TcpProbeClient {
    pub fn new(timeouts: TimeoutPolicy, retry: RetryPolicy) -> Self {
        Self { timeouts, retry }
    }

    async fn attempt(
        &self,
        endpoint: &Endpoint,
        tls: Option<&(TlsConnector, ServerName<'static>)>,
        request: &ProbeRequest,
    ) -> AttemptOutcome {
        let connect_timeout = request
            .transport
            .as_ref()
            .and_then(|t| t.connect_timeout)
            .unwrap_or(self.timeouts.connect_timeout);
        let stream = match timeout(connect_timeout, TcpStream::connect(endpoint.authority())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return AttemptOutcome::Failed(e.to_string()),
            Err(_) => return AttemptOutcome::Failed(format!("connect timed out after {:?}", connect_timeout)),
        };

        let request_timeout = request.timeout.unwrap_or(self.timeouts.request_timeout);
        let exchange = async move {
            match tls {
                Some((connector, server_name)) => {
                    let stream = connector
                        .connect(server_name.clone(), stream)
                        .await
                        .map_err(|e| format!("TLS handshake: {}", e))?;
                    read_echo(stream).await
                }
                None => read_echo(stream).await,
            }
        };

        match timeout(request_timeout, exchange).await {
            Ok(Ok(response)) => AttemptOutcome::Accepted(response),
            Ok(Err(reason)) => AttemptOutcome::Failed(reason),
            Err(_) => AttemptOutcome::Failed(format!("no response within {:?}", request_timeout)),
        }
    }
}

#[async_trait]
impl ProbeClient for TcpProbeClient {
    async fn probe(
        &self,
        endpoint: &Endpoint,
        request: &ProbeRequest,
        attempts: u32,
    ) -> Result<ProbeResponse> {
        let tls = match request.effective_tls() {
            Some(config) => {
                let name = request
                    .transport
                    .as_ref()
                    .and_then(|t| t.server_name.clone())
                    .unwrap_or_else(|| endpoint.host().to_string());
                let server_name = ServerName::try_from(name.clone())
                    .map_err(|e| HarnessError::Tls(format!("Invalid server name {}: {}", name, e)))?;
                Some((TlsConnector::from(Arc::new(config.to_rustls()?)), server_name))
            }
            None => None,
        };
        debug!("Probing tcp {} (tls: {})", endpoint, tls.is_some());

        let tls = tls.as_ref();
        self.retry
            .run(endpoint, attempts, move |_| async move {
                self.attempt(endpoint, tls, request).await
            })
            .await
    }
}

async fn read_echo<S: AsyncRead + Unpin>(stream: S) -> std::result::Result<ProbeResponse, String> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| format!("reading response: {}", e))?;
    if line.trim().is_empty() {
        return Err("connection closed without a response".to_string());
    }
    ProbeResponse::from_echo(0, line.trim_end().as_bytes())
        .map_err(|e| format!("undecodable response: {}", e))
}
