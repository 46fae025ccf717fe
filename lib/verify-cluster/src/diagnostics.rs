//! Best-effort diagnostics for router workloads under test

use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use verify_api::RoutingRule;

use crate::client::ControlPlane;

/// Poll for the router pods of `rule` and log how to inspect them once they exist.
///
/// The task ends when pods are found (returning their names) or when `cancel` fires
/// (returning `None`). List errors are retried on the next tick.
pub fn spawn_pod_diagnostics(
    plane: Arc<dyn ControlPlane>,
    rule: &RoutingRule,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<Option<Vec<String>>> {
    let namespace = rule.namespace_or_default();
    let selector = rule.label_selector();

    tokio::spawn(async move {
        loop {
            let listed = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                listed = plane.list_pods(&namespace, &selector) => listed,
            };

            match listed {
                Ok(pods) if !pods.is_empty() => {
                    let names: Vec<String> = pods.iter().map(|p| p.name_any()).collect();
                    for name in &names {
                        warn!("Log: $ kubectl logs -f {} -n {}", name, namespace);
                        warn!("Exec: $ kubectl exec {} -n {} sh", name, namespace);
                    }
                    return Some(names);
                }
                Ok(_) => debug!("No pods yet for selector {}", selector),
                Err(e) => debug!("Listing pods for {} failed: {}", selector, e),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(interval) => {}
            }
        }

        debug!("Pod diagnostics for {} cancelled", selector);
        None
    })
}
