//! Selects the endpoints of a service that a node should use.

use crate::{
    api::{EndpointInfo, ServiceInfo},
    proxystore::Tree,
};
use std::collections::BTreeMap;

pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// The topology key matching any endpoint.
pub const ANY_TOPOLOGY: &str = "*";

/// Computes the endpoints of `service` visible from `node_name`.
///
/// Topology keys are tried in order and the first key selecting at least one ready endpoint
/// wins. A key is skipped when the node has no value for it. The wildcard key is a last resort:
/// it only applies when none of the keys before it matched a node label, so a node that has a
/// preferred label but no endpoint sharing its value gets no endpoints.
///
/// Endpoints hinted for zones are only visible to nodes in one of those zones.
///
/// The returned endpoints are copies, with `local` set on endpoints hosted by the node.
pub fn for_node(tree: &Tree, service: &ServiceInfo, node_name: &str) -> Vec<EndpointInfo> {
    let mut labels = tree
        .get_node(node_name)
        .map(|n| n.labels.clone())
        .unwrap_or_default();
    labels
        .entry(HOSTNAME_LABEL.to_string())
        .or_insert_with(|| node_name.to_string());

    let zone = labels.get(ZONE_LABEL).map(String::as_str);
    let endpoints = tree
        .each_endpoint_of_service(service.namespace(), service.name())
        .filter(|ei| ei.is_hinted_for(zone))
        .map(|ei| {
            let mut ei = (**ei).clone();
            let local = ei.node_name == node_name;
            if let Some(ep) = ei.endpoint.as_mut() {
                ep.local = local;
            }
            ei
        })
        .collect::<Vec<_>>();

    select(&labels, &service.topology_keys, endpoints)
}

fn select(
    labels: &BTreeMap<String, String>,
    topology_keys: &[String],
    endpoints: Vec<EndpointInfo>,
) -> Vec<EndpointInfo> {
    let default_keys = [ANY_TOPOLOGY.to_string()];
    let keys = if topology_keys.is_empty() {
        &default_keys[..]
    } else {
        topology_keys
    };

    let mut constrained = false;
    for key in keys {
        let selected = if key == ANY_TOPOLOGY {
            if constrained {
                break;
            }
            endpoints
                .iter()
                .filter(|ei| ei.is_ready())
                .cloned()
                .collect::<Vec<_>>()
        } else {
            let value = match labels.get(key) {
                Some(value) if !value.is_empty() => value,
                _ => continue,
            };
            constrained = true;
            endpoints
                .iter()
                .filter(|ei| ei.is_ready() && ei.topology.get(key) == Some(value))
                .cloned()
                .collect::<Vec<_>>()
        };

        if !selected.is_empty() {
            return selected;
        }
    }

    Vec::new()
}
