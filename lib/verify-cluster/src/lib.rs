//! Cluster-facing side of the verification harness
pub mod client;
pub mod diagnostics;
pub mod poller;
pub mod resolver;

#[cfg(test)]
mod testing;

pub use client::{ControlPlane, KubeControlPlane};
pub use diagnostics::spawn_pod_diagnostics;
pub use poller::{ConvergencePoller, PollSettings};
pub use resolver::{
    free_node_port, offshoot_service, EndpointResolver, EndpointSource, HostPortSource,
    LoadBalancerSource, NodePortSource,
};
