//! Cluster-wide values, as stored by the proxy store and served by the global API.

use super::localnet::{Endpoint, Service};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EndpointConditions {
    #[prost(bool, tag = "1")]
    pub ready: bool,
    #[prost(bool, tag = "2")]
    pub serving: bool,
    #[prost(bool, tag = "3")]
    pub terminating: bool,
}

/// An endpoint of a service, as produced by one source object.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EndpointInfo {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub service_name: String,
    /// The object (an `EndpointSlice` or `Endpoints`) that produced this endpoint.
    #[prost(string, tag = "3")]
    pub source_name: String,
    #[prost(string, tag = "4")]
    pub node_name: String,
    #[prost(string, tag = "5")]
    pub pod_name: String,
    #[prost(btree_map = "string, string", tag = "6")]
    pub topology: BTreeMap<String, String>,
    #[prost(message, optional, tag = "7")]
    pub endpoint: Option<Endpoint>,
    #[prost(message, optional, tag = "8")]
    pub conditions: Option<EndpointConditions>,
    /// Content hash of the endpoint, conditions, topology and hints.
    #[prost(uint64, tag = "9")]
    #[serde(skip)]
    pub hash: u64,
    /// The zones this endpoint is hinted for, sorted. Empty when the endpoint has no hints.
    #[prost(string, repeated, tag = "10")]
    pub hint_zones: Vec<String>,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServiceInfo {
    #[prost(message, optional, tag = "1")]
    pub service: Option<Service>,
    #[prost(string, repeated, tag = "2")]
    pub topology_keys: Vec<String>,
    #[prost(uint64, tag = "3")]
    pub hash: u64,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Node {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(btree_map = "string, string", tag = "2")]
    pub labels: BTreeMap<String, String>,
    #[prost(btree_map = "string, string", tag = "3")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NodeInfo {
    #[prost(message, optional, tag = "1")]
    pub node: Option<Node>,
    #[prost(uint64, tag = "2")]
    pub hash: u64,
}

// === impl EndpointInfo ===

impl EndpointInfo {
    pub fn is_ready(&self) -> bool {
        self.conditions.as_ref().is_some_and(|c| c.ready)
    }

    /// Whether the endpoint's hints let a node in `zone` use it.
    pub fn is_hinted_for(&self, zone: Option<&str>) -> bool {
        self.hint_zones.is_empty() || zone.is_some_and(|z| self.hint_zones.iter().any(|h| h == z))
    }

    /// The subset of fields that identifies the endpoint's content.
    pub fn content(&self) -> EndpointInfo {
        EndpointInfo {
            endpoint: self.endpoint.clone(),
            conditions: self.conditions.clone(),
            topology: self.topology.clone(),
            hint_zones: self.hint_zones.clone(),
            ..Default::default()
        }
    }
}

// === impl ServiceInfo ===

impl ServiceInfo {
    pub fn namespace(&self) -> &str {
        self.service.as_ref().map_or("", |s| s.namespace.as_str())
    }

    pub fn name(&self) -> &str {
        self.service.as_ref().map_or("", |s| s.name.as_str())
    }
}

// === impl NodeInfo ===

impl NodeInfo {
    pub fn name(&self) -> &str {
        self.node.as_ref().map_or("", |n| n.name.as_str())
    }
}
