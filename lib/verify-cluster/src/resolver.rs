//! Resolving the externally reachable endpoints of a routing rule

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service, ServicePort};
use kube::ResourceExt;
use tracing::{debug, info};
use verify_api::{ExposureMode, RoutingRule};
use verify_core::{allocate_free_node_port, Endpoint, HarnessError, Result};

use crate::client::ControlPlane;

const SCHEME: &str = "http";

/// Produces endpoint addresses for one exposure mode from live cluster state
#[async_trait]
pub trait EndpointSource: Send + Sync {
    async fn endpoints(&self, rule: &RoutingRule) -> Result<Vec<Endpoint>>;
}

/// Dispatches on a rule's exposure mode to the source registered for it
pub struct EndpointResolver {
    sources: HashMap<ExposureMode, Arc<dyn EndpointSource>>,
}

impl EndpointResolver {
    /// Resolver with the built-in source for every exposure mode
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self::empty()
            .with_source(
                ExposureMode::LoadBalancer,
                Arc::new(LoadBalancerSource::new(plane.clone())),
            )
            .with_source(
                ExposureMode::HostPort,
                Arc::new(HostPortSource::new(plane.clone())),
            )
            .with_source(ExposureMode::NodePort, Arc::new(NodePortSource::new(plane)))
    }

    /// Resolver without sources; every mode is unresolvable until one is added
    pub fn empty() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    /// Register or replace the source for `mode`
    pub fn with_source(mut self, mode: ExposureMode, source: Arc<dyn EndpointSource>) -> Self {
        self.sources.insert(mode, source);
        self
    }

    /// Endpoints for `rule`. Never returns an empty list: unknown modes, a missing
    /// router service and empty results are all resolution errors.
    pub async fn resolve(&self, rule: &RoutingRule) -> Result<Vec<Endpoint>> {
        let mode = rule.exposure_mode()?;
        let source = self
            .sources
            .get(&mode)
            .ok_or_else(|| HarnessError::UnrecognizedExposureMode(mode.to_string()))?;

        let no_endpoints = || HarnessError::NoEndpoints {
            rule: format!("{}/{}", rule.namespace_or_default(), rule.name_any()),
            mode: mode.to_string(),
        };
        let endpoints = match source.endpoints(rule).await {
            Ok(endpoints) => endpoints,
            Err(HarnessError::ResourceMissing { kind, namespace, name }) => {
                debug!("{} {}/{} missing, no {} endpoints", kind, namespace, name, mode);
                return Err(no_endpoints());
            }
            Err(e) => return Err(e),
        };
        if endpoints.is_empty() {
            return Err(no_endpoints());
        }

        info!(
            "Resolved {} {} endpoint(s) for {}",
            endpoints.len(),
            mode,
            rule.name_any()
        );
        Ok(endpoints)
    }
}

/// Fetch the Service the router derives from `rule`
pub async fn offshoot_service(plane: &dyn ControlPlane, rule: &RoutingRule) -> Result<Service> {
    let namespace = rule.namespace_or_default();
    let name = rule.derived_name();
    plane
        .get_service(&namespace, &name)
        .await?
        .ok_or(HarnessError::ResourceMissing {
            kind: "Service",
            namespace,
            name,
        })
}

/// First node port >= `candidate` not used by any service in the cluster
pub async fn free_node_port(plane: &dyn ControlPlane, candidate: i32) -> Result<i32> {
    let reserved: BTreeSet<i32> = plane
        .list_services()
        .await?
        .iter()
        .flat_map(service_ports)
        .filter_map(|p| p.node_port)
        .collect();

    let port = allocate_free_node_port(candidate, &reserved)?;
    debug!(
        "Allocated node port {} (candidate {}, {} reserved)",
        port,
        candidate,
        reserved.len()
    );
    Ok(port)
}

fn service_ports(svc: &Service) -> Vec<ServicePort> {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.ports.clone())
        .unwrap_or_default()
}

/// First address of a node whose type appears in `types`, in `types` order
fn node_address(node: &Node, types: &[&str]) -> Option<String> {
    let addresses = node.status.as_ref()?.addresses.as_ref()?;
    types
        .iter()
        .find_map(|t| addresses.iter().find(|a| a.type_ == *t))
        .map(|a| a.address.clone())
}

fn push_unique(hosts: &mut Vec<String>, host: String) {
    if !hosts.contains(&host) {
        hosts.push(host);
    }
}

/// Load balancer ingress addresses × service ports
pub struct LoadBalancerSource {
    plane: Arc<dyn ControlPlane>,
}

impl LoadBalancerSource {
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl EndpointSource for LoadBalancerSource {
    async fn endpoints(&self, rule: &RoutingRule) -> Result<Vec<Endpoint>> {
        let svc = offshoot_service(self.plane.as_ref(), rule).await?;

        let mut hosts = Vec::new();
        let ingress = svc
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref());
        for entry in ingress.into_iter().flatten() {
            if let Some(host) = entry.ip.clone().or_else(|| entry.hostname.clone()) {
                push_unique(&mut hosts, host);
            }
        }
        debug!("Load balancer for {} has {} address(es)", rule.name_any(), hosts.len());

        let ports = service_ports(&svc);
        Ok(hosts
            .iter()
            .flat_map(|host| {
                ports
                    .iter()
                    .map(move |p| Endpoint::from_parts(SCHEME, host, p.port))
            })
            .collect())
    }
}

/// Nodes running router pods × service ports
pub struct HostPortSource {
    plane: Arc<dyn ControlPlane>,
}

impl HostPortSource {
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl EndpointSource for HostPortSource {
    async fn endpoints(&self, rule: &RoutingRule) -> Result<Vec<Endpoint>> {
        let namespace = rule.namespace_or_default();
        let svc = offshoot_service(self.plane.as_ref(), rule).await?;
        let pods = self.plane.list_pods(&namespace, &rule.label_selector()).await?;
        let nodes = self.plane.list_nodes().await?;

        let mut hosts = Vec::new();
        for pod in &pods {
            let status = pod.status.as_ref();
            if status.and_then(|s| s.phase.as_deref()) != Some("Running") {
                continue;
            }
            let node_name = pod.spec.as_ref().and_then(|s| s.node_name.as_deref());
            let external = node_name.and_then(|name| {
                nodes
                    .iter()
                    .find(|n| n.metadata.name.as_deref() == Some(name))
                    .and_then(|n| node_address(n, &["ExternalIP"]))
            });
            if let Some(host) = external.or_else(|| status.and_then(|s| s.host_ip.clone())) {
                push_unique(&mut hosts, host);
            }
        }
        debug!("{} router pod(s) on {} host(s)", pods.len(), hosts.len());

        let ports = service_ports(&svc);
        Ok(hosts
            .iter()
            .flat_map(|host| {
                ports
                    .iter()
                    .map(move |p| Endpoint::from_parts(SCHEME, host, p.port))
            })
            .collect())
    }
}

/// Every node × every allocated node port
pub struct NodePortSource {
    plane: Arc<dyn ControlPlane>,
}

impl NodePortSource {
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl EndpointSource for NodePortSource {
    async fn endpoints(&self, rule: &RoutingRule) -> Result<Vec<Endpoint>> {
        let svc = offshoot_service(self.plane.as_ref(), rule).await?;
        let nodes = self.plane.list_nodes().await?;

        let mut hosts = Vec::new();
        for node in &nodes {
            if let Some(host) = node_address(node, &["ExternalIP", "InternalIP"]) {
                push_unique(&mut hosts, host);
            }
        }

        let node_ports: Vec<i32> = service_ports(&svc)
            .iter()
            .filter_map(|p| p.node_port)
            .collect();
        Ok(hosts
            .iter()
            .flat_map(|host| {
                node_ports
                    .iter()
                    .map(move |port| Endpoint::from_parts(SCHEME, host, *port))
            })
            .collect())
    }
}
