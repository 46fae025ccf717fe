use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Mechanism by which a routing rule's backend becomes reachable externally
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExposureMode {
    /// Cloud load balancer in front of the router service
    LoadBalancer,
    /// Router pods bind the service ports directly on their nodes
    HostPort,
    /// Cluster-wide allocated node ports
    NodePort,
}

/// Exposure mode string that does not name a known mode
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("exposure mode not recognized: {0:?}")]
pub struct UnknownExposureMode(pub String);

impl ExposureMode {
    /// All supported modes
    pub const ALL: [ExposureMode; 3] = [
        ExposureMode::LoadBalancer,
        ExposureMode::HostPort,
        ExposureMode::NodePort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureMode::LoadBalancer => "LoadBalancer",
            ExposureMode::HostPort => "HostPort",
            ExposureMode::NodePort => "NodePort",
        }
    }

    /// Whether readiness also requires an Endpoints object for the router service.
    /// Host-port routers are reached through node ports bound by the pods themselves.
    pub fn requires_endpoints_record(&self) -> bool {
        !matches!(self, ExposureMode::HostPort)
    }
}

impl Default for ExposureMode {
    fn default() -> Self {
        ExposureMode::LoadBalancer
    }
}

impl fmt::Display for ExposureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExposureMode {
    type Err = UnknownExposureMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LoadBalancer" => Ok(ExposureMode::LoadBalancer),
            "HostPort" => Ok(ExposureMode::HostPort),
            "NodePort" => Ok(ExposureMode::NodePort),
            other => Err(UnknownExposureMode(other.to_string())),
        }
    }
}
