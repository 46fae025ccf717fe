//! Runner configuration loaded from YAML

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use verify_cluster::PollSettings;
use verify_probe::{AcceptMode, ClientIdentity, ProbeRequest, Protocol};

pub const CONFIG_ENV: &str = "EDGE_VERIFY_CONFIG";
pub const NAMESPACE_ENV: &str = "EDGE_VERIFY_NAMESPACE";

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerConfig {
    pub namespace: String,
    /// Attempts per probe
    pub retries: u32,
    pub ready: PollConfig,
    pub presence: PollConfig,
    pub diagnostics_interval_secs: u64,
    pub scenarios: Vec<ScenarioConfig>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let ready = PollSettings::ready();
        let presence = PollSettings::presence();
        Self {
            namespace: "default".to_string(),
            retries: 3,
            ready: PollConfig {
                timeout_secs: ready.timeout.as_secs(),
                interval_secs: ready.interval.as_secs(),
            },
            presence: PollConfig {
                timeout_secs: presence.timeout.as_secs(),
                interval_secs: presence.interval.as_secs(),
            },
            diagnostics_interval_secs: 5,
            scenarios: Vec::new(),
        }
    }
}

impl RunnerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("{} is not a valid runner config", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides
    pub fn with_env(mut self, namespace: Option<String>) -> Self {
        if let Some(namespace) = namespace.filter(|ns| !ns.is_empty()) {
            self.namespace = namespace;
        }
        self
    }

    fn validate(&self) -> Result<()> {
        for poll in [&self.ready, &self.presence] {
            if poll.interval_secs == 0 {
                anyhow::bail!("poll interval must be at least one second");
            }
        }
        for scenario in &self.scenarios {
            if let Some(dist) = &scenario.distribution {
                if dist.rounds == 0 {
                    anyhow::bail!("scenario {}: distribution needs at least one round", scenario.rule);
                }
                if scenario.probe.accept == AcceptConfig::StatusOnly {
                    anyhow::bail!(
                        "scenario {}: distribution needs echo bodies, not accept: statusOnly",
                        scenario.rule
                    );
                }
            }
        }
        Ok(())
    }

    pub fn diagnostics_interval(&self) -> Duration {
        Duration::from_secs(self.diagnostics_interval_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollConfig {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl PollConfig {
    pub fn settings(&self) -> PollSettings {
        PollSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            interval: Duration::from_secs(self.interval_secs),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolConfig {
    #[default]
    Http,
    Https,
    Tcp,
}

impl From<ProtocolConfig> for Protocol {
    fn from(protocol: ProtocolConfig) -> Self {
        match protocol {
            ProtocolConfig::Http => Protocol::Http,
            ProtocolConfig::Https => Protocol::Https,
            ProtocolConfig::Tcp => Protocol::Tcp,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AcceptConfig {
    #[default]
    Exact,
    FollowRedirects,
    StatusOnly,
}

impl From<AcceptConfig> for AcceptMode {
    fn from(accept: AcceptConfig) -> Self {
        match accept {
            AcceptConfig::Exact => AcceptMode::Exact,
            AcceptConfig::FollowRedirects => AcceptMode::FollowRedirects,
            AcceptConfig::StatusOnly => AcceptMode::StatusOnly,
        }
    }
}

/// One routing rule to verify
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioConfig {
    /// RoutingRule name
    pub rule: String,
    /// Keep only endpoints serving this service port (or its node port)
    #[serde(default)]
    pub port: Option<i32>,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub distribution: Option<DistributionSettings>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeConfig {
    pub method: String,
    pub path: String,
    pub host: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub accept: AcceptConfig,
    pub expected_status: u16,
    /// CA bundle for HTTPS; unset or empty means the certificate is not verified
    pub ca_cert_file: Option<PathBuf>,
    pub client_cert_file: Option<PathBuf>,
    pub client_key_file: Option<PathBuf>,
    /// SNI presented instead of the endpoint address
    pub server_name: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/".to_string(),
            host: None,
            headers: BTreeMap::new(),
            accept: AcceptConfig::Exact,
            expected_status: 200,
            ca_cert_file: None,
            client_cert_file: None,
            client_key_file: None,
            server_name: None,
            timeout_secs: None,
        }
    }
}

impl ProbeConfig {
    /// Build the probe request, reading any certificate files
    pub fn to_request(&self, protocol: ProtocolConfig) -> Result<ProbeRequest> {
        let mut request = ProbeRequest::new(&self.method, &self.path)
            .with_headers(self.headers.clone())
            .accept(self.accept.into());
        if let Some(host) = &self.host {
            request = request.with_host(host);
        }
        if let Some(secs) = self.timeout_secs {
            request = request.with_timeout(Duration::from_secs(secs));
        }

        if protocol == ProtocolConfig::Https || self.ca_cert_file.is_some() {
            let ca_pem = match &self.ca_cert_file {
                Some(path) => read_file(path)?,
                None => Vec::new(),
            };
            request = request.with_ca_cert(ca_pem);
        }
        match (&self.client_cert_file, &self.client_key_file) {
            (Some(cert), Some(key)) => {
                request = request.with_client_identity(ClientIdentity::new(
                    read_file(cert)?,
                    read_file(key)?,
                ));
            }
            (None, None) => {}
            _ => anyhow::bail!("clientCertFile and clientKeyFile must be set together"),
        }
        if let Some(server_name) = &self.server_name {
            request = request.with_sni(server_name);
        }
        Ok(request)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSettings {
    /// Service name shared by the two weighted deployments
    pub backend: String,
    #[serde(default = "default_rounds")]
    pub rounds: usize,
    #[serde(default = "default_min_ratio")]
    pub min_ratio: f64,
}

fn default_rounds() -> usize {
    verify_probe::distribution::DEFAULT_PROBE_ROUNDS
}

fn default_min_ratio() -> f64 {
    verify_probe::distribution::DEFAULT_MIN_RATIO
}
