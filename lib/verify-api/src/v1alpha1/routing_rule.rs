use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::exposure::{ExposureMode, UnknownExposureMode};

/// Prefix of every resource the router derives from a RoutingRule
pub const DERIVED_NAME_PREFIX: &str = "edge-";

/// Label carried by every workload the router derives from a RoutingRule
pub const ORIGIN_LABEL: &str = "origin";
/// Label naming the RoutingRule a workload belongs to
pub const ORIGIN_NAME_LABEL: &str = "origin-name";
const ORIGIN_VALUE: &str = "edge-router";

/// RoutingRule exposes one or more backend services through the edge router
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "router.datum.net",
    version = "v1alpha1",
    kind = "RoutingRule",
    plural = "routingrules",
    namespaced,
    derive = "Default",
    status = "RoutingRuleStatus",
    printcolumn = r#"{"name":"Exposure","type":"string","jsonPath":".spec.exposureMode"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRuleSpec {
    /// How the router is exposed: LoadBalancer, HostPort or NodePort.
    /// Kept as a string so unsupported values survive until resolution.
    #[serde(default = "default_exposure_mode")]
    pub exposure_mode: String,

    /// Extra labels selecting the router workload pods
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    /// Host/path rules
    #[serde(default)]
    pub rules: Vec<RouteRule>,

    /// TLS termination
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSecretRef>,
}

/// Host and path rule
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    /// Hostname to match; empty matches every host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Path prefix (e.g. "/testpath")
    pub path: String,

    /// Backends sharing this path
    pub backends: Vec<WeightedBackend>,
}

/// Backend service with an optional traffic weight
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WeightedBackend {
    pub service_name: String,
    pub service_port: i32,

    /// Relative weight; unset backends share traffic evenly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

/// Secret holding the serving certificate
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSecretRef {
    pub secret_name: String,

    #[serde(default)]
    pub hosts: Vec<String>,
}

/// Status of a RoutingRule
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRuleStatus {
    /// Addresses published by the load balancer, if any
    #[serde(default)]
    pub load_balancer: Vec<IngressAddress>,
}

/// Load balancer ingress address
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IngressAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

fn default_exposure_mode() -> String {
    ExposureMode::default().as_str().to_string()
}

impl Default for RoutingRuleSpec {
    fn default() -> Self {
        Self {
            exposure_mode: default_exposure_mode(),
            selector: BTreeMap::new(),
            rules: Vec::new(),
            tls: None,
        }
    }
}

impl RoutingRule {
    /// Namespace of the rule, "default" when unset
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    /// Name shared by the Deployment, Service and ConfigMap derived from this rule
    pub fn derived_name(&self) -> String {
        format!("{}{}", DERIVED_NAME_PREFIX, self.name_any())
    }

    pub fn exposure_mode(&self) -> Result<ExposureMode, UnknownExposureMode> {
        self.spec.exposure_mode.parse()
    }

    /// Labels of the router workload pods
    pub fn workload_selector(&self) -> BTreeMap<String, String> {
        let mut labels = self.spec.selector.clone();
        labels.insert(ORIGIN_LABEL.to_string(), ORIGIN_VALUE.to_string());
        labels.insert(ORIGIN_NAME_LABEL.to_string(), self.name_any());
        labels
    }

    /// `workload_selector` rendered as a Kubernetes label selector
    pub fn label_selector(&self) -> String {
        self.workload_selector()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(mode: &str) -> RoutingRule {
        let mut rule = RoutingRule::new(
            "weighted",
            RoutingRuleSpec {
                exposure_mode: mode.to_string(),
                ..Default::default()
            },
        );
        rule.metadata.namespace = Some("e2e".to_string());
        rule
    }

    #[test]
    fn test_derived_name() {
        assert_eq!(rule("NodePort").derived_name(), "edge-weighted");
    }

    #[test]
    fn test_namespace_fallback() {
        let mut r = rule("NodePort");
        assert_eq!(r.namespace_or_default(), "e2e");
        r.metadata.namespace = None;
        assert_eq!(r.namespace_or_default(), "default");
    }

    #[test]
    fn test_exposure_mode_parsing() {
        assert_eq!(rule("HostPort").exposure_mode(), Ok(ExposureMode::HostPort));
        assert!(rule("Ingress").exposure_mode().is_err());
    }

    #[test]
    fn test_label_selector_includes_origin_labels() {
        let mut r = rule("LoadBalancer");
        r.spec.selector.insert("app".to_string(), "edge".to_string());
        assert_eq!(
            r.label_selector(),
            "app=edge,origin=edge-router,origin-name=weighted"
        );
    }

    #[test]
    fn test_default_spec_deserialization() {
        let spec: RoutingRuleSpec = serde_json::from_str(r#"{"rules":[]}"#).unwrap();
        assert_eq!(spec.exposure_mode, "LoadBalancer");
        assert!(spec.selector.is_empty());
    }
}
