use crate::{
    api::{EndpointInfo, Node, Service},
    proxystore::{Set, Tree},
};
use serde::{Deserialize, Serialize};

/// The cluster state persisted by the file sink and read back by the file source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct GlobalState {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub services: Vec<ServiceState>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ServiceState {
    pub service: Service,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topology_keys: Vec<String>,
    #[serde(default)]
    pub endpoints: Vec<EndpointInfo>,
}

// === impl GlobalState ===

impl GlobalState {
    /// Captures the nodes, services and endpoints of a tree.
    ///
    /// Endpoint fields implied by the enclosing service are cleared.
    pub fn from_tree(tree: &Tree) -> Self {
        let nodes = tree
            .each(Set::Nodes)
            .filter_map(|(_, v)| v.as_node()?.node.clone())
            .collect();

        let services = tree
            .each(Set::Services)
            .filter_map(|(_, v)| v.as_service())
            .filter_map(|si| {
                let service = si.service.clone()?;
                let endpoints = tree
                    .each_endpoint_of_service(&service.namespace, &service.name)
                    .map(|ei| EndpointInfo {
                        namespace: String::new(),
                        service_name: String::new(),
                        source_name: String::new(),
                        hash: 0,
                        ..(**ei).clone()
                    })
                    .collect();
                Some(ServiceState {
                    service,
                    topology_keys: si.topology_keys.clone(),
                    endpoints,
                })
            })
            .collect();

        Self { nodes, services }
    }
}
