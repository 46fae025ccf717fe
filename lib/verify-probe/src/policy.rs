//! Timeout and retry policies shared by the probe clients

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;
use verify_core::{Endpoint, HarnessError, Result};

use crate::client::ProbeResponse;

/// Timeouts for a single probe attempt
#[derive(Clone, Debug, PartialEq)]
pub struct TimeoutPolicy {
    /// Total time allowed for one attempt
    pub request_timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Retry behavior between probe attempts
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// HTTP status codes that trigger a retry
    pub retryable_status_codes: Vec<u16>,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retryable_status_codes: vec![502, 503, 504], // Bad Gateway, Service Unavailable, Gateway Timeout
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Result of one probe attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Usable response; stop retrying
    Accepted(ProbeResponse),
    /// Response received but worth retrying; returned if it is the last attempt
    Retryable(ProbeResponse),
    /// No usable response
    Failed(String),
}

impl RetryPolicy {
    /// Check if a status code should trigger a retry
    pub fn should_retry(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Calculate backoff duration for the given retry count
    pub fn backoff_duration(&self, retry_count: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as u64;
        let exponential = 2u64.saturating_pow(retry_count);
        let backoff_ms = base
            .saturating_mul(exponential)
            .min(self.max_backoff.as_millis() as u64);
        Duration::from_millis(backoff_ms)
    }

    /// Run `attempt` up to `attempts` times (at least once), backing off in between.
    ///
    /// Returns the first accepted response. When the budget runs out, the last
    /// response is returned if the last attempt produced one, otherwise the last
    /// failure becomes a `ProbeTransport` error.
    pub async fn run<F, Fut>(
        &self,
        endpoint: &Endpoint,
        attempts: u32,
        mut attempt: F,
    ) -> Result<ProbeResponse>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AttemptOutcome>,
    {
        let budget = attempts.max(1);
        let mut n = 1;

        loop {
            match attempt(n).await {
                AttemptOutcome::Accepted(response) => return Ok(response),
                AttemptOutcome::Retryable(response) if n >= budget => return Ok(response),
                AttemptOutcome::Retryable(response) => {
                    debug!(
                        "Attempt {}/{} to {} returned status {}, retrying",
                        n, budget, endpoint, response.status
                    );
                }
                AttemptOutcome::Failed(reason) if n >= budget => {
                    return Err(HarnessError::ProbeTransport {
                        endpoint: endpoint.to_string(),
                        attempts: budget,
                        reason,
                    });
                }
                AttemptOutcome::Failed(reason) => {
                    debug!("Attempt {}/{} to {} failed: {}", n, budget, endpoint, reason);
                }
            }
            sleep(self.backoff_duration(n - 1)).await;
            n += 1;
        }
    }
}
