use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use verify_cluster::KubeControlPlane;

mod config;
mod runner;

use config::{RunnerConfig, CONFIG_ENV, NAMESPACE_ENV};
use runner::Runner;

const LOG_FORMAT_ENV: &str = "EDGE_VERIFY_LOG_FORMAT";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var(LOG_FORMAT_ENV).is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("usage: edge-verify <config.yaml> (or set {})", CONFIG_ENV))?;
    let config = RunnerConfig::load(&path)?.with_env(std::env::var(NAMESPACE_ENV).ok());

    info!(
        "Starting edge-verify: {} scenario(s) in namespace {}",
        config.scenarios.len(),
        config.namespace
    );

    let plane = KubeControlPlane::try_default().await?;
    let runner = Runner::new(Arc::new(plane), config);

    let mut failed = 0;
    for scenario in &runner.config().scenarios {
        match runner.run(scenario).await {
            Ok(()) => info!("Scenario {} passed", scenario.rule),
            Err(e) => {
                error!("Scenario {} failed: {:#}", scenario.rule, e);
                failed += 1;
            }
        }
    }

    let total = runner.config().scenarios.len();
    if failed > 0 {
        bail!("{} of {} scenario(s) failed", failed, total);
    }
    info!("All {} scenario(s) passed", total);
    Ok(())
}
