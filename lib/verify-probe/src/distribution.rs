//! Statistical check of weighted traffic splits between two backends

use tracing::info;
use verify_core::{Endpoint, HarnessError, Result, ScenarioContext};

use crate::client::{AcceptMode, ProbeRequest, ProbeResponse};
use crate::dispatcher::{ProbeDispatcher, Protocol};

pub const DEFAULT_PROBE_ROUNDS: usize = 100;
pub const DEFAULT_MIN_RATIO: f64 = 9.0;

/// Parameters of one distribution run
#[derive(Clone, Debug, PartialEq)]
pub struct DistributionConfig {
    /// Dispatch rounds against the endpoint set
    pub rounds: usize,
    /// Lowest acceptable `ceil(primary / secondary)`
    pub min_ratio: f64,
    /// Attempts per probe
    pub retries: u32,
    pub primary_prefix: String,
    pub secondary_prefix: String,
    pub protocol: Protocol,
    pub request: ProbeRequest,
    pub expected_status: u16,
}

impl DistributionConfig {
    /// 90/10 split between the `dep-1-<backend>` and `dep-2-<backend>` deployments
    pub fn weighted(backend: &str, request: ProbeRequest) -> Self {
        Self {
            rounds: DEFAULT_PROBE_ROUNDS,
            min_ratio: DEFAULT_MIN_RATIO,
            retries: 3,
            primary_prefix: ScenarioContext::weighted_origin_prefix(1, backend),
            secondary_prefix: ScenarioContext::weighted_origin_prefix(2, backend),
            protocol: Protocol::Http,
            request,
            expected_status: 200,
        }
    }
}

/// Tallies and ratio of a completed run
#[derive(Clone, Debug, PartialEq)]
pub struct DistributionReport {
    pub primary: usize,
    pub secondary: usize,
    pub ratio: f64,
}

impl DistributionReport {
    /// Responses received during the run
    pub fn total(&self) -> usize {
        self.primary + self.secondary
    }
}

#[derive(Debug, Default)]
struct Tally {
    primary: usize,
    secondary: usize,
}

impl Tally {
    /// Count a response and report whether it is acceptable
    fn record(&mut self, response: &ProbeResponse, config: &DistributionConfig) -> bool {
        // TCP echoes carry only the origin
        let baseline = match config.protocol {
            Protocol::Tcp => true,
            Protocol::Http | Protocol::Https => {
                response.echoes(config.expected_status, &config.request)
            }
        };
        if !baseline {
            return false;
        }
        if response.origin.starts_with(&config.primary_prefix) {
            self.primary += 1;
            true
        } else if response.origin.starts_with(&config.secondary_prefix) {
            self.secondary += 1;
            true
        } else {
            false
        }
    }
}

/// `ceil(primary / secondary)`; a split with no secondary responses has no ratio
pub fn split_ratio(primary: usize, secondary: usize) -> Result<f64> {
    if secondary == 0 {
        return Err(HarnessError::DegenerateSplit { primary });
    }
    Ok((primary as f64 / secondary as f64).ceil())
}

/// Runs sequential probe rounds and checks the primary/secondary split
pub struct TrafficDistributionVerifier<'a> {
    dispatcher: &'a ProbeDispatcher,
    config: DistributionConfig,
}

impl<'a> TrafficDistributionVerifier<'a> {
    pub fn new(dispatcher: &'a ProbeDispatcher, config: DistributionConfig) -> Self {
        Self { dispatcher, config }
    }

    pub async fn verify(&self, endpoints: &[Endpoint]) -> Result<DistributionReport> {
        let config = &self.config;
        if config.request.accept == AcceptMode::StatusOnly {
            return Err(HarnessError::InvalidConfiguration(
                "status-only responses carry no origin to classify".to_string(),
            ));
        }
        let mut tally = Tally::default();

        for _ in 0..config.rounds {
            self.dispatcher
                .dispatch(
                    config.retries,
                    endpoints,
                    config.protocol,
                    &config.request,
                    |response| tally.record(response, config),
                )
                .await?;
        }

        let ratio = split_ratio(tally.primary, tally.secondary)?;
        info!(
            "Traffic split {} ({}) / {} ({}), ratio {}",
            config.primary_prefix, tally.primary, config.secondary_prefix, tally.secondary, ratio
        );
        if ratio < config.min_ratio {
            return Err(HarnessError::DistributionSkewed {
                ratio,
                minimum: config.min_ratio,
            });
        }

        Ok(DistributionReport {
            primary: tally.primary,
            secondary: tally.secondary,
            ratio,
        })
    }
}
