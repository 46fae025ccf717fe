//! HTTP and HTTPS probes

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HOST};
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use tracing::debug;
use verify_core::{Endpoint, HarnessError, Result};

use crate::client::{AcceptMode, ProbeClient, ProbeRequest, ProbeResponse};
use crate::policy::{AttemptOutcome, RetryPolicy, TimeoutPolicy};

const MAX_REDIRECTS: usize = 10;

/// Probes HTTP(S) endpoints of a router and decodes the echo body
#[derive(Clone, Debug, Default)]
pub struct HttpProbeClient {
    timeouts: TimeoutPolicy,
    retry: RetryPolicy,
}

impl HttpProbeClient {
    pub fn new(timeouts: TimeoutPolicy, retry: RetryPolicy) -> Self {
        Self { timeouts, retry }
    }

    /// Build a client for one probe and the URL to request
    async fn prepare(&self, endpoint: &Endpoint, request: &ProbeRequest) -> Result<(Client, String)> {
        let redirect = match request.accept {
            AcceptMode::FollowRedirects => Policy::limited(MAX_REDIRECTS),
            AcceptMode::Exact | AcceptMode::StatusOnly => Policy::none(),
        };
        let mut builder = Client::builder()
            .redirect(redirect)
            .connect_timeout(self.timeouts.connect_timeout);

        if let Some(tls) = request.effective_tls() {
            builder = builder.use_preconfigured_tls(tls.to_rustls()?);
        }

        let scheme = endpoint.scheme().unwrap_or("http");
        let mut url = format!("{}://{}{}", scheme, endpoint.authority(), request.normalized_path());

        if let Some(transport) = &request.transport {
            for (domain, addr) in &transport.resolve {
                builder = builder.resolve(domain, *addr);
            }
            if let Some(connect_timeout) = transport.connect_timeout {
                builder = builder.connect_timeout(connect_timeout);
            }
            if let Some(server_name) = &transport.server_name {
                let addr = socket_addr(endpoint).await?;
                debug!("Presenting {} for {} ({})", server_name, endpoint, addr);
                builder = builder.resolve(server_name, addr);
                url = format!(
                    "{}://{}:{}{}",
                    scheme,
                    server_name,
                    addr.port(),
                    request.normalized_path()
                );
            }
        }

        let client = builder
            .build()
            .map_err(|e| HarnessError::InvalidConfiguration(format!("HTTP client: {}", e)))?;
        Ok((client, url))
    }

    async fn attempt(
        &self,
        client: &Client,
        method: Method,
        url: &str,
        request: &ProbeRequest,
    ) -> AttemptOutcome {
        let mut builder = client
            .request(method, url)
            .timeout(attempt_timeout(request, &self.timeouts));
        if let Some(host) = &request.host {
            builder = builder.header(HOST, host);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return AttemptOutcome::Failed(e.to_string()),
        };
        let status = response.status().as_u16();
        let headers = header_map(response.headers());

        if self.retry.should_retry(status) {
            return AttemptOutcome::Retryable(ProbeResponse {
                status,
                headers,
                ..Default::default()
            });
        }

        if request.accept == AcceptMode::StatusOnly {
            return AttemptOutcome::Accepted(ProbeResponse {
                status,
                headers,
                ..Default::default()
            });
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return AttemptOutcome::Failed(format!("reading body: {}", e)),
        };

        match ProbeResponse::from_echo(status, &body) {
            Ok(mut echo) => {
                echo.headers = headers;
                AttemptOutcome::Accepted(echo)
            }
            Err(e) => AttemptOutcome::Failed(format!("status {} with undecodable body: {}", status, e)),
        }
    }
}

#[async_trait]
impl ProbeClient for HttpProbeClient {
    async fn probe(
        &self,
        endpoint: &Endpoint,
        request: &ProbeRequest,
        attempts: u32,
    ) -> Result<ProbeResponse> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            HarnessError::InvalidConfiguration(format!("HTTP method {:?}", request.method))
        })?;
        let (client, url) = self.prepare(endpoint, request).await?;
        debug!("Probing {} {} via {}", request.method, url, endpoint);

        let client = &client;
        let url = url.as_str();
        let method = &method;
        self.retry
            .run(endpoint, attempts, move |_| async move {
                self.attempt(client, method.clone(), url, request).await
            })
            .await
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

async fn socket_addr(endpoint: &Endpoint) -> Result<SocketAddr> {
    let failed = |reason: String| HarnessError::ProbeTransport {
        endpoint: endpoint.to_string(),
        attempts: 1,
        reason,
    };
    let mut addrs = tokio::net::lookup_host(endpoint.authority())
        .await
        .map_err(|e| failed(format!("resolving {}: {}", endpoint.authority(), e)))?;
    addrs
        .next()
        .ok_or_else(|| failed(format!("{} resolved to no address", endpoint.authority())))
}

fn attempt_timeout(request: &ProbeRequest, policy: &TimeoutPolicy) -> Duration {
    request.timeout.unwrap_or(policy.request_timeout)
}
