/// API version v1alpha1 for routing rules

pub mod exposure;
pub mod routing_rule;

pub use exposure::{ExposureMode, UnknownExposureMode};
pub use routing_rule::{IngressAddress, RoutingRule, RoutingRuleSpec, RoutingRuleStatus};

/// API group for routing rule resources
pub const API_GROUP: &str = "router.datum.net";
/// API version for routing rule resources
pub const API_VERSION: &str = "v1alpha1";
