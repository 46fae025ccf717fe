//! In-memory control plane for unit tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Endpoints, LoadBalancerIngress, LoadBalancerStatus, Node, NodeAddress, NodeStatus,
    Pod, PodSpec, PodStatus, Service, ServicePort, ServiceSpec, ServiceStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::time::Instant;
use verify_api::{IngressAddress, RoutingRule, RoutingRuleSpec, RoutingRuleStatus};
use verify_core::Result;

use crate::client::ControlPlane;

struct Timed<T> {
    visible_from: Instant,
    value: T,
}

type Objects<T> = Mutex<BTreeMap<String, Timed<T>>>;

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

fn lookup<T: Clone>(objects: &Objects<T>, namespace: &str, name: &str) -> Option<T> {
    let objects = objects.lock().unwrap();
    objects
        .get(&key(namespace, name))
        .filter(|t| Instant::now() >= t.visible_from)
        .map(|t| t.value.clone())
}

fn store<T>(objects: &Objects<T>, meta: &ObjectMeta, value: T, delay: Duration) {
    let namespace = meta.namespace.clone().unwrap_or_default();
    let name = meta.name.clone().unwrap_or_default();
    objects.lock().unwrap().insert(
        key(&namespace, &name),
        Timed {
            visible_from: Instant::now() + delay,
            value,
        },
    );
}

/// Objects become visible once the (possibly paused) tokio clock reaches their delay
#[derive(Default)]
pub(crate) struct FakeControlPlane {
    services: Objects<Service>,
    endpoints: Objects<Endpoints>,
    deployments: Objects<Deployment>,
    config_maps: Objects<ConfigMap>,
    routing_rules: Objects<RoutingRule>,
    pods: Mutex<Vec<Pod>>,
    nodes: Mutex<Vec<Node>>,
    pub(crate) pod_lists: AtomicUsize,
}

impl FakeControlPlane {
    pub(crate) fn add_service(&self, svc: Service) {
        self.add_service_after(svc, Duration::ZERO);
    }

    pub(crate) fn add_service_after(&self, svc: Service, delay: Duration) {
        let meta = svc.metadata.clone();
        store(&self.services, &meta, svc, delay);
    }

    pub(crate) fn add_endpoints(&self, namespace: &str, name: &str) {
        let eps = Endpoints {
            metadata: meta(namespace, name),
            ..Default::default()
        };
        let meta = eps.metadata.clone();
        store(&self.endpoints, &meta, eps, Duration::ZERO);
    }

    pub(crate) fn add_deployment(&self, namespace: &str, name: &str) {
        let dep = Deployment {
            metadata: meta(namespace, name),
            ..Default::default()
        };
        let meta = dep.metadata.clone();
        store(&self.deployments, &meta, dep, Duration::ZERO);
    }

    pub(crate) fn add_config_map_after(&self, namespace: &str, name: &str, delay: Duration) {
        let cm = ConfigMap {
            metadata: meta(namespace, name),
            ..Default::default()
        };
        let meta = cm.metadata.clone();
        store(&self.config_maps, &meta, cm, delay);
    }

    pub(crate) fn add_routing_rule_after(&self, rule: RoutingRule, delay: Duration) {
        let meta = rule.metadata.clone();
        store(&self.routing_rules, &meta, rule, delay);
    }

    pub(crate) fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    pub(crate) fn add_node(&self, node: Node) {
        self.nodes.lock().unwrap().push(node);
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(lookup(&self.services, namespace, name))
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>> {
        Ok(lookup(&self.endpoints, namespace, name))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(lookup(&self.deployments, namespace, name))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(lookup(&self.config_maps, namespace, name))
    }

    async fn get_routing_rule(&self, namespace: &str, name: &str) -> Result<Option<RoutingRule>> {
        Ok(lookup(&self.routing_rules, namespace, name))
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let services = self.services.lock().unwrap();
        Ok(services.values().map(|t| t.value.clone()).collect())
    }

    async fn list_pods(&self, namespace: &str, _label_selector: &str) -> Result<Vec<Pod>> {
        self.pod_lists.fetch_add(1, Ordering::SeqCst);
        let pods = self.pods.lock().unwrap();
        Ok(pods
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.lock().unwrap().clone())
    }
}

pub(crate) fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

pub(crate) fn rule(namespace: &str, name: &str, mode: &str) -> RoutingRule {
    let mut rule = RoutingRule::new(
        name,
        RoutingRuleSpec {
            exposure_mode: mode.to_string(),
            ..Default::default()
        },
    );
    rule.metadata.namespace = Some(namespace.to_string());
    rule
}

/// Rule whose status publishes `lb_ips`
pub(crate) fn published_rule(namespace: &str, name: &str, lb_ips: &[&str]) -> RoutingRule {
    let mut published = rule(namespace, name, "LoadBalancer");
    published.status = Some(RoutingRuleStatus {
        load_balancer: lb_ips
            .iter()
            .map(|ip| IngressAddress {
                ip: Some(ip.to_string()),
                hostname: None,
            })
            .collect(),
    });
    published
}

/// Service with `(port, nodePort)` pairs and optional load balancer IPs
pub(crate) fn service(
    namespace: &str,
    name: &str,
    ports: &[(i32, Option<i32>)],
    lb_ips: &[&str],
) -> Service {
    let ports = ports
        .iter()
        .map(|(port, node_port)| ServicePort {
            port: *port,
            node_port: *node_port,
            ..Default::default()
        })
        .collect();
    let ingress = lb_ips
        .iter()
        .map(|ip| LoadBalancerIngress {
            ip: Some(ip.to_string()),
            ..Default::default()
        })
        .collect();
    Service {
        metadata: meta(namespace, name),
        spec: Some(ServiceSpec {
            ports: Some(ports),
            ..Default::default()
        }),
        status: Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(ingress),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

pub(crate) fn pod(namespace: &str, name: &str, node: &str, host_ip: &str) -> Pod {
    Pod {
        metadata: meta(namespace, name),
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            host_ip: Some(host_ip.to_string()),
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

/// Node with `(type, address)` pairs
pub(crate) fn node(name: &str, addresses: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(NodeStatus {
            addresses: Some(
                addresses
                    .iter()
                    .map(|(type_, address)| NodeAddress {
                        type_: type_.to_string(),
                        address: address.to_string(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}
