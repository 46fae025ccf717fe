//! Polling the control plane until a routing rule's resources converge

use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use verify_api::{ExposureMode, IngressAddress, RoutingRule};
use verify_core::{HarnessError, Result};

use crate::client::ControlPlane;

/// Deadline and poll interval for a convergence wait
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollSettings {
    /// Waiting for the router service (and endpoints) to be started
    pub fn ready() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            interval: Duration::from_secs(20),
        }
    }

    /// Waiting for the derived Deployment, Service and ConfigMap
    pub fn presence() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(10),
        }
    }
}

/// Checks for dependent resources until they exist or a deadline passes.
/// Holds no state between calls.
pub struct ConvergencePoller {
    plane: Arc<dyn ControlPlane>,
}

impl ConvergencePoller {
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }

    /// Poll until the router service, and unless `mode` is HostPort its Endpoints, exist.
    ///
    /// The first check runs immediately and the last one at the deadline. Returns false
    /// once the deadline has passed; callers decide how to fail.
    pub async fn wait_until_ready(
        &self,
        rule: &RoutingRule,
        mode: ExposureMode,
        timeout: Duration,
        interval: Duration,
    ) -> bool {
        let namespace = rule.namespace_or_default();
        let name = rule.derived_name();
        let deadline = Instant::now() + timeout;

        loop {
            if self.is_started(&namespace, &name, mode).await {
                info!("Router for {}/{} started", namespace, rule.name_any());
                return true;
            }
            if !wait_for_next_poll(deadline, interval).await {
                warn!(
                    "Router for {}/{} not started within {:?}",
                    namespace,
                    rule.name_any(),
                    timeout
                );
                return false;
            }
        }
    }

    async fn is_started(&self, namespace: &str, name: &str, mode: ExposureMode) -> bool {
        match self.plane.get_service(namespace, name).await {
            Ok(Some(_)) => {}
            Ok(None) => return false,
            Err(e) => {
                debug!("Getting service {}/{} failed: {}", namespace, name, e);
                return false;
            }
        }

        if !mode.requires_endpoints_record() {
            return true;
        }

        match self.plane.get_endpoints(namespace, name).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                debug!("Getting endpoints {}/{} failed: {}", namespace, name, e);
                false
            }
        }
    }

    /// Single check that the derived Deployment, Service and ConfigMap all exist.
    /// Returns the first missing resource as an error.
    pub async fn check_presence(&self, rule: &RoutingRule) -> Result<()> {
        let namespace = rule.namespace_or_default();
        let name = rule.derived_name();
        let missing = |kind: &'static str| HarnessError::ResourceMissing {
            kind,
            namespace: namespace.clone(),
            name: name.clone(),
        };

        if self.plane.get_deployment(&namespace, &name).await?.is_none() {
            return Err(missing("Deployment"));
        }
        if self.plane.get_service(&namespace, &name).await?.is_none() {
            return Err(missing("Service"));
        }
        if self.plane.get_config_map(&namespace, &name).await?.is_none() {
            return Err(missing("ConfigMap"));
        }
        Ok(())
    }

    /// Retry `check_presence` until it succeeds or the deadline passes
    pub async fn wait_for_presence(
        &self,
        rule: &RoutingRule,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            let err = match self.check_presence(rule).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            warn!("Resources for {} not present yet: {}", rule.name_any(), err);

            if !wait_for_next_poll(deadline, interval).await {
                return Err(HarnessError::ConvergenceTimeout {
                    waited: timeout,
                    last: Box::new(err),
                });
            }
        }
    }
}

impl ConvergencePoller {
    /// Single check that the rule's status lists the same load balancer ingress as its
    /// derived Service: same count and same first entry.
    pub async fn check_status_propagation(&self, rule: &RoutingRule) -> Result<()> {
        let namespace = rule.namespace_or_default();
        let rule_name = rule.name_any();
        let name = rule.derived_name();
        let mismatch = |reason: String| HarnessError::StatusMismatch {
            rule: format!("{}/{}", namespace, rule_name),
            reason,
        };

        let published = self
            .plane
            .get_routing_rule(&namespace, &rule_name)
            .await?
            .ok_or_else(|| HarnessError::ResourceMissing {
                kind: "RoutingRule",
                namespace: namespace.clone(),
                name: rule_name.clone(),
            })?
            .status
            .map(|status| status.load_balancer)
            .unwrap_or_default();

        let svc = self
            .plane
            .get_service(&namespace, &name)
            .await?
            .ok_or_else(|| HarnessError::ResourceMissing {
                kind: "Service",
                namespace: namespace.clone(),
                name: name.clone(),
            })?;
        let expected: Vec<IngressAddress> = svc
            .status
            .and_then(|status| status.load_balancer)
            .and_then(|lb| lb.ingress)
            .unwrap_or_default()
            .into_iter()
            .map(|ingress| IngressAddress {
                ip: ingress.ip,
                hostname: ingress.hostname,
            })
            .collect();

        if expected.is_empty() {
            return Err(mismatch(format!("service {} has no load balancer ingress", name)));
        }
        if published.len() != expected.len() {
            return Err(mismatch(format!(
                "{} ingress entries published, service has {}",
                published.len(),
                expected.len()
            )));
        }
        if published.first() != expected.first() {
            return Err(mismatch(format!(
                "first ingress {:?} differs from service's {:?}",
                published.first(),
                expected.first()
            )));
        }
        Ok(())
    }

    /// Retry `check_status_propagation` until it succeeds or the deadline passes
    pub async fn wait_for_status_propagation(
        &self,
        rule: &RoutingRule,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            let err = match self.check_status_propagation(rule).await {
                Ok(()) => {
                    info!("Status of {} reflects its load balancer", rule.name_any());
                    return Ok(());
                }
                Err(e) => e,
            };
            debug!("Status of {} not propagated yet: {}", rule.name_any(), err);

            if !wait_for_next_poll(deadline, interval).await {
                return Err(HarnessError::ConvergenceTimeout {
                    waited: timeout,
                    last: Box::new(err),
                });
            }
        }
    }
}

/// Sleep until the next poll, clamped to the deadline.
/// Returns false when the deadline has already been reached.
async fn wait_for_next_poll(deadline: Instant, interval: Duration) -> bool {
    let now = Instant::now();
    if now >= deadline {
        return false;
    }
    sleep(interval.min(deadline - now)).await;
    true
}
