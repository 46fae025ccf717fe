use std::time::Duration;

use thiserror::Error;
use verify_api::UnknownExposureMode;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Exposure mode not recognized: {0}")]
    UnrecognizedExposureMode(String),

    #[error("No endpoints resolved for {rule} (exposure mode {mode})")]
    NoEndpoints { rule: String, mode: String },

    #[error("{kind} {namespace}/{name} not found")]
    ResourceMissing {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("Resources did not converge within {waited:?}: {last}")]
    ConvergenceTimeout {
        waited: Duration,
        last: Box<HarnessError>,
    },

    #[error("Probe to {endpoint} failed after {attempts} attempt(s): {reason}")]
    ProbeTransport {
        endpoint: String,
        attempts: u32,
        reason: String,
    },

    #[error("Status of {rule} does not reflect its service: {reason}")]
    StatusMismatch { rule: String, reason: String },

    #[error("Response from {endpoint} failed to match")]
    ProbeMatch { endpoint: String },

    #[error("No free node port in [{candidate}, {candidate} + {window})")]
    PortAllocationExhausted { candidate: i32, window: i32 },

    #[error("Traffic split undefined: {primary} primary responses and none from the secondary backend")]
    DegenerateSplit { primary: usize },

    #[error("Traffic split ratio {ratio} is below the required {minimum}")]
    DistributionSkewed { ratio: f64, minimum: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Kubernetes error: {0}")]
    KubernetesError(#[from] kube::error::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl HarnessError {
    /// Errors reporting that no usable endpoint set exists for a rule
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            HarnessError::UnrecognizedExposureMode(_) | HarnessError::NoEndpoints { .. }
        )
    }
}

impl From<UnknownExposureMode> for HarnessError {
    fn from(err: UnknownExposureMode) -> Self {
        HarnessError::UnrecognizedExposureMode(err.0)
    }
}
