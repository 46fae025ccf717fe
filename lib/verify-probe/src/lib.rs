pub mod client;
pub mod dispatcher;
pub mod distribution;
pub mod http;
pub mod policy;
pub mod tcp;
pub mod tls;

#[cfg(test)]
mod testing;

pub use client::{AcceptMode, ProbeClient, ProbeRequest, ProbeResponse, TransportOverride};
pub use dispatcher::{ProbeDispatcher, Protocol};
pub use distribution::{
    split_ratio, DistributionConfig, DistributionReport, TrafficDistributionVerifier,
};
pub use http::HttpProbeClient;
pub use policy::{RetryPolicy, TimeoutPolicy};
pub use tcp::TcpProbeClient;
pub use tls::{ClientIdentity, TlsClientConfig};
