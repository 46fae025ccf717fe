//! Runs one verification scenario end to end

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};
use verify_api::{ExposureMode, RoutingRule};
use verify_cluster::{
    offshoot_service, spawn_pod_diagnostics, ControlPlane, ConvergencePoller, EndpointResolver,
};
use verify_core::{filter_by_port, Endpoint, ScenarioContext};
use verify_probe::{
    AcceptMode, DistributionConfig, ProbeDispatcher, ProbeRequest, ProbeResponse, Protocol,
    TrafficDistributionVerifier,
};

use crate::config::{RunnerConfig, ScenarioConfig};

pub struct Runner {
    plane: Arc<dyn ControlPlane>,
    poller: ConvergencePoller,
    resolver: EndpointResolver,
    dispatcher: ProbeDispatcher,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(plane: Arc<dyn ControlPlane>, config: RunnerConfig) -> Self {
        Self {
            poller: ConvergencePoller::new(plane.clone()),
            resolver: EndpointResolver::new(plane.clone()),
            dispatcher: ProbeDispatcher::new(),
            plane,
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub async fn run(&self, scenario: &ScenarioConfig) -> Result<()> {
        let ctx = ScenarioContext::new(self.config.namespace.clone());
        let rule = self
            .plane
            .get_routing_rule(ctx.namespace(), &scenario.rule)
            .await?
            .ok_or_else(|| anyhow!("RoutingRule {}/{} not found", ctx.namespace(), scenario.rule))?;
        let mode = rule.exposure_mode()?;
        info!(
            "Verifying {}/{} ({}) as scenario {}",
            ctx.namespace(),
            scenario.rule,
            mode,
            ctx.suffix()
        );

        let diagnostics = spawn_pod_diagnostics(
            self.plane.clone(),
            &rule,
            self.config.diagnostics_interval(),
            ctx.cancellation(),
        );

        let ready = self.config.ready.settings();
        if !self
            .poller
            .wait_until_ready(&rule, mode, ready.timeout, ready.interval)
            .await
        {
            bail!("router for {} did not start within {:?}", scenario.rule, ready.timeout);
        }
        let presence = self.config.presence.settings();
        self.poller
            .wait_for_presence(&rule, presence.timeout, presence.interval)
            .await?;
        if mode == ExposureMode::LoadBalancer {
            self.poller
                .wait_for_status_propagation(&rule, presence.timeout, presence.interval)
                .await?;
        }

        let endpoints = self.endpoints(&rule, scenario).await?;
        let protocol: Protocol = scenario.protocol.into();
        let request = scenario.probe.to_request(scenario.protocol)?;
        let expected_status = scenario.probe.expected_status;

        self.dispatcher
            .dispatch(self.config.retries, &endpoints, protocol, &request, |response| {
                accepts(protocol, expected_status, &request, response)
            })
            .await
            .with_context(|| format!("probing {}", scenario.rule))?;

        if let Some(settings) = &scenario.distribution {
            let mut config = DistributionConfig::weighted(&settings.backend, request.clone());
            config.rounds = settings.rounds;
            config.min_ratio = settings.min_ratio;
            config.retries = self.config.retries;
            config.protocol = protocol;
            config.expected_status = expected_status;

            let report = TrafficDistributionVerifier::new(&self.dispatcher, config)
                .verify(&endpoints)
                .await
                .with_context(|| format!("traffic split for {}", scenario.rule))?;
            info!(
                "Split for {}: {}/{} (ratio {})",
                scenario.rule, report.primary, report.secondary, report.ratio
            );
        }

        ctx.finish();
        if let Ok(Some(pods)) = diagnostics.await {
            debug!("Router pods for {}: {:?}", scenario.rule, pods);
        }
        Ok(())
    }

    async fn endpoints(&self, rule: &RoutingRule, scenario: &ScenarioConfig) -> Result<Vec<Endpoint>> {
        let endpoints = self.resolver.resolve(rule).await?;
        let Some(port) = scenario.port else {
            return Ok(endpoints);
        };

        let svc = offshoot_service(self.plane.as_ref(), rule).await?;
        let service_port = svc
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .and_then(|ports| ports.iter().find(|p| p.port == port))
            .ok_or_else(|| anyhow!("service for {} has no port {}", scenario.rule, port))?;

        let filtered = filter_by_port(&endpoints, service_port);
        if filtered.is_empty() {
            bail!("no endpoint of {} serves port {}", scenario.rule, port);
        }
        Ok(filtered)
    }
}

/// Default matcher: TCP probes need an origin, status-only probes the expected
/// status, everything else a full echo of the request.
fn accepts(
    protocol: Protocol,
    expected_status: u16,
    request: &ProbeRequest,
    response: &ProbeResponse,
) -> bool {
    match (protocol, request.accept) {
        (Protocol::Tcp, _) => !response.origin.is_empty(),
        (_, AcceptMode::StatusOnly) => response.status == expected_status,
        _ => response.echoes(expected_status, request),
    }
}
