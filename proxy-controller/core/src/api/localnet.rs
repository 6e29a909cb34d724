//! Per-node service and endpoint values, as consumed by local backends.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, net::IpAddr};

/// A sorted, de-duplicated set of IPv4 and IPv6 addresses.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IpSet {
    #[prost(string, repeated, tag = "1")]
    pub v4: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub v6: Vec<String>,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServiceIps {
    #[prost(message, optional, tag = "1")]
    pub cluster_ips: Option<IpSet>,
    #[prost(message, optional, tag = "2")]
    pub external_ips: Option<IpSet>,
    #[prost(message, optional, tag = "3")]
    pub load_balancer_ips: Option<IpSet>,
    #[prost(bool, tag = "4")]
    pub headless: bool,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize, Deserialize,
)]
#[repr(i32)]
pub enum Protocol {
    UnknownProtocol = 0,
    Tcp = 1,
    Udp = 2,
    Sctp = 3,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PortMapping {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "Protocol", tag = "2")]
    pub protocol: i32,
    #[prost(int32, tag = "3")]
    pub port: i32,
    #[prost(int32, tag = "4")]
    pub node_port: i32,
    #[prost(int32, tag = "5")]
    pub target_port: i32,
    #[prost(string, tag = "6")]
    pub target_port_name: String,
}

/// Session affinity by client IP.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ClientIpAffinity {
    #[prost(int32, tag = "1")]
    pub timeout_seconds: i32,
}

/// Restricts the sources allowed to reach a set of service IPs.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IpFilter {
    #[prost(message, optional, tag = "1")]
    pub target_ips: Option<IpSet>,
    #[prost(string, repeated, tag = "2")]
    pub source_ranges: Vec<String>,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Service {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub r#type: String,
    #[prost(btree_map = "string, string", tag = "4")]
    pub labels: BTreeMap<String, String>,
    #[prost(btree_map = "string, string", tag = "5")]
    pub annotations: BTreeMap<String, String>,
    #[prost(message, optional, tag = "6")]
    pub ips: Option<ServiceIps>,
    #[prost(message, repeated, tag = "7")]
    pub ports: Vec<PortMapping>,
    #[prost(message, optional, tag = "8")]
    pub client_ip: Option<ClientIpAffinity>,
    #[prost(message, repeated, tag = "9")]
    pub ip_filters: Vec<IpFilter>,
    #[prost(bool, tag = "10")]
    pub external_traffic_to_local: bool,
    #[prost(bool, tag = "11")]
    pub internal_traffic_to_local: bool,
}

/// Overrides the target port of a named service port for one endpoint.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PortName {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub port: i32,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Endpoint {
    #[prost(message, optional, tag = "1")]
    pub ips: Option<IpSet>,
    #[prost(bool, tag = "2")]
    pub local: bool,
    #[prost(string, tag = "3")]
    pub hostname: String,
    #[prost(message, repeated, tag = "4")]
    pub port_overrides: Vec<PortName>,
}

// === impl IpSet ===

impl IpSet {
    /// Adds an address, keeping each family sorted.
    ///
    /// Returns false when `ip` cannot be parsed.
    pub fn add(&mut self, ip: &str) -> bool {
        let addr = match ip.trim().parse::<IpAddr>() {
            Ok(addr) => addr,
            Err(_) => return false,
        };
        let (list, ip) = match addr {
            IpAddr::V4(v4) => (&mut self.v4, v4.to_string()),
            IpAddr::V6(v6) => (&mut self.v6, v6.to_string()),
        };
        if let Err(idx) = list.binary_search(&ip) {
            list.insert(idx, ip);
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.v4.iter().chain(self.v6.iter()).map(String::as_str)
    }
}

impl<'a> FromIterator<&'a str> for IpSet {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        let mut set = IpSet::default();
        for ip in iter {
            set.add(ip);
        }
        set
    }
}

// === impl Service ===

impl Service {
    /// The `namespace/name` identity used by the per-node view.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipset_sorts_and_dedups() {
        let mut set = IpSet::default();
        assert!(set.add("10.0.0.2"));
        assert!(set.add("10.0.0.1"));
        assert!(set.add("10.0.0.2"));
        assert!(set.add("fd00::1"));
        assert!(!set.add("not-an-ip"));
        assert_eq!(set.v4, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(set.v6, vec!["fd00::1"]);
        assert_eq!(set.len(), 3);
    }
}
