use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An address serving a Service. Always an IP; domain members are written
/// with a placeholder (see [`crate::address`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointAddress {
    pub ip: String,
}

impl EndpointAddress {
    pub fn new(ip: impl Into<String>) -> Self {
        Self { ip: ip.into() }
    }
}

/// A port exposed by the addresses of a subset. For third-party members the
/// port name is the member's uuid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointPort {
    pub name: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

/// A group of addresses sharing the same port set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EndpointSubset {
    #[serde(default)]
    pub addresses: Vec<EndpointAddress>,
    #[serde(default)]
    pub not_ready_addresses: Vec<EndpointAddress>,
    #[serde(default)]
    pub ports: Vec<EndpointPort>,
}

impl EndpointSubset {
    /// True when one of the subset's ports is named `name`.
    pub fn has_port_named(&self, name: &str) -> bool {
        self.ports.iter().any(|p| p.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.not_ready_addresses.is_empty()
    }
}

/// Endpoints represents the set of backend addresses for a Service,
/// keyed by `namespace/name` in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Endpoints {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub subsets: Vec<EndpointSubset>,
}
