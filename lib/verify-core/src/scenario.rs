//! Per-scenario context threaded through polling, resolution and probing

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SUFFIX_LEN: usize = 5;

/// Names and lifetime of one verification scenario.
///
/// Each scenario gets its own random suffix identifying it in logs, and a
/// cancellation token that background tasks (pod diagnostics) are tied to. Dropping
/// the context ends the scenario.
#[derive(Debug)]
pub struct ScenarioContext {
    namespace: String,
    suffix: String,
    cancel: CancellationToken,
}

impl ScenarioContext {
    pub fn new(namespace: impl Into<String>) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LEN)
            .map(|b| (b as char).to_ascii_lowercase())
            .collect();
        Self::with_suffix(namespace, suffix)
    }

    /// Context with a fixed suffix, for reproducible names
    pub fn with_suffix(namespace: impl Into<String>, suffix: impl Into<String>) -> Self {
        let ctx = Self {
            namespace: namespace.into(),
            suffix: suffix.into(),
            cancel: CancellationToken::new(),
        };
        debug!("Scenario context created in {} (suffix {})", ctx.namespace, ctx.suffix);
        ctx
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Random suffix tagging this scenario in logs
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Pod name prefix of the `index`-th weighted deployment behind `backend`
    pub fn weighted_origin_prefix(index: usize, backend: &str) -> String {
        format!("dep-{}-{}", index, backend)
    }

    /// Token cancelled when the scenario ends
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// End the scenario, stopping every task tied to it
    pub fn finish(&self) {
        debug!("Scenario in {} (suffix {}) finished", self.namespace, self.suffix);
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ScenarioContext {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
