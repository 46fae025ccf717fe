//! Core types for verifying routing rules end to end
//!
//! This library provides:
//! - The harness error taxonomy
//! - Endpoint addresses and port filtering
//! - Conflict-avoiding node port allocation
//! - Per-scenario context (generated names, cancellation)

pub mod endpoint;
pub mod error;
pub mod ports;
pub mod scenario;

pub use endpoint::{filter_by_port, Endpoint};
pub use error::{HarnessError, Result};
pub use ports::allocate_free_node_port;
pub use scenario::ScenarioContext;
