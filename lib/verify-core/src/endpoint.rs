//! Endpoint addresses produced by resolution and consumed by probes

use std::fmt;

use k8s_openapi::api::core::v1::ServicePort;
use serde::{Deserialize, Serialize};

/// Externally reachable address, `scheme://host:port`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Build an endpoint from its parts, bracketing IPv6 hosts
    pub fn from_parts(scheme: &str, host: &str, port: i32) -> Self {
        if host.contains(':') && !host.starts_with('[') {
            Self(format!("{}://[{}]:{}", scheme, host, port))
        } else {
            Self(format!("{}://{}:{}", scheme, host, port))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scheme of the address, if it has one
    pub fn scheme(&self) -> Option<&str> {
        self.0.find("://").map(|pos| &self.0[..pos])
    }

    /// Whether the address ends in `:<port>`
    pub fn has_port(&self, port: i32) -> bool {
        self.0.ends_with(&format!(":{}", port))
    }

    /// Same address with `http://` replaced by `https://`; other schemes are kept
    pub fn with_secure_scheme(&self) -> Endpoint {
        match self.0.strip_prefix("http://") {
            Some(rest) => Endpoint(format!("https://{}", rest)),
            None => self.clone(),
        }
    }

    /// `host:port` part of the address
    pub fn authority(&self) -> &str {
        let without_scheme = match self.0.find("://") {
            Some(pos) => &self.0[pos + 3..],
            None => &self.0,
        };
        match without_scheme.find('/') {
            Some(slash) => &without_scheme[..slash],
            None => without_scheme,
        }
    }

    /// Host part without brackets
    pub fn host(&self) -> &str {
        let authority = self.authority();
        if let Some(rest) = authority.strip_prefix('[') {
            return rest.split(']').next().unwrap_or(rest);
        }
        match authority.rfind(':') {
            Some(colon) => &authority[..colon],
            None => authority,
        }
    }

    pub fn port(&self) -> Option<u16> {
        let authority = self.authority();
        let colon = authority.rfind(':')?;
        if authority[colon..].contains(']') {
            return None;
        }
        authority[colon + 1..].parse().ok()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Endpoint {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl From<&str> for Endpoint {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

impl AsRef<str> for Endpoint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Keep the endpoints serving `port`, either on its service port or its node port.
/// Order is preserved and duplicates are kept.
pub fn filter_by_port(endpoints: &[Endpoint], port: &ServicePort) -> Vec<Endpoint> {
    endpoints
        .iter()
        .filter(|ep| ep.has_port(port.port) || port.node_port.is_some_and(|np| ep.has_port(np)))
        .cloned()
        .collect()
}
