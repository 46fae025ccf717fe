//! Conflict-avoiding node port allocation

use std::collections::BTreeSet;

use crate::{HarnessError, Result};

/// Ports searched past the candidate; the size of the default 30000-32767 range
pub const NODE_PORT_SEARCH_WINDOW: i32 = 2768;

const MAX_PORT: i32 = 65535;

/// Smallest port >= `candidate` that is not in `reserved`.
///
/// The search covers at most `NODE_PORT_SEARCH_WINDOW` ports and never goes above 65535.
pub fn allocate_free_node_port(candidate: i32, reserved: &BTreeSet<i32>) -> Result<i32> {
    let upper = candidate.saturating_add(NODE_PORT_SEARCH_WINDOW).min(MAX_PORT + 1);
    (candidate..upper)
        .find(|port| !reserved.contains(port))
        .ok_or(HarnessError::PortAllocationExhausted {
            candidate,
            window: NODE_PORT_SEARCH_WINDOW,
        })
}
