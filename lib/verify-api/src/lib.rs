//! Routing rule types consumed by the endpoint verification harness
//!
//! This library defines:
//! - RoutingRule: the custom resource under test, with its exposure mode
//! - ExposureMode: how the rule's backend is reached from outside the cluster
//! - Naming helpers for the resources the router derives from a rule

pub mod v1alpha1;

pub use v1alpha1::{
    ExposureMode, IngressAddress, RoutingRule, RoutingRuleSpec, RoutingRuleStatus,
    UnknownExposureMode,
};
