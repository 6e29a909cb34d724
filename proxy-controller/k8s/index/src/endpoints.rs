//! Legacy `Endpoints` projection, used when slices are disabled.
//!
//! `Endpoints` carry no topology: endpoint topology is taken from the labels of the hosting
//! node when the endpoints are indexed, and refreshed by the node index when those labels change.

use crate::{metrics::SizedIndex, Names};
use kpng_proxy_controller_core::{
    api::{Endpoint, EndpointConditions, EndpointInfo, IpSet, PortName},
    proxystore::{Set, Store, Tree},
};
use kpng_proxy_controller_k8s_api::{self as k8s, labels, ResourceExt};
use kubert::index::NamespacedRemoved;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info_span, warn};

const SOURCE_PREFIX: &str = "endpoints/";

#[derive(Debug)]
pub struct EndpointsIndex {
    store: Arc<Store>,
    names: Names,
    synced: bool,
}

/// The source name of an `Endpoints` object. It can not collide with a slice name.
pub fn source_name(name: &str) -> String {
    format!("{SOURCE_PREFIX}{name}")
}

pub fn is_legacy_source(source: &str) -> bool {
    source.starts_with(SOURCE_PREFIX)
}

/// The topology of an endpoint hosted by `node_name`.
pub(crate) fn node_topology(tree: &Tree, node_name: &str) -> BTreeMap<String, String> {
    if node_name.is_empty() {
        return BTreeMap::new();
    }
    let mut topology = tree
        .get_node(node_name)
        .map(|n| n.labels.clone())
        .unwrap_or_default();
    topology
        .entry(labels::HOSTNAME.to_string())
        .or_insert_with(|| node_name.to_string());
    topology
}

// === impl EndpointsIndex ===

impl EndpointsIndex {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            names: Names::default(),
            synced: false,
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Endpoints> for EndpointsIndex {
    fn apply(&mut self, eps: k8s::Endpoints) {
        let Some(ns) = eps.namespace() else {
            return;
        };
        let name = eps.name_unchecked();
        let _span = info_span!("apply", %ns, %name).entered();

        self.names.insert(ns.clone(), name.clone());
        self.store.update(|tx| {
            let endpoints = endpoints_of(&eps, &ns, tx);
            debug!(endpoints = endpoints.len(), "Updating endpoints");
            tx.set_endpoints_of_source(&ns, &source_name(&name), endpoints);
        });
    }

    fn delete(&mut self, ns: String, name: String) {
        let _span = info_span!("delete", %ns, %name).entered();

        self.names.remove(&ns, &name);
        debug!("Deleting endpoints");
        self.store
            .update(|tx| tx.del_endpoints_of_source(&ns, &source_name(&name)));
    }

    fn reset(&mut self, all: Vec<k8s::Endpoints>, removed: NamespacedRemoved) {
        let _span = info_span!("reset").entered();
        debug!(endpoints = all.len(), "Resetting endpoints");

        for eps in &all {
            if let Some(ns) = eps.namespace() {
                self.names.insert(ns, eps.name_unchecked());
            }
        }
        for (ns, names) in &removed {
            for name in names {
                self.names.remove(ns, name);
            }
        }

        let mark_synced = !std::mem::replace(&mut self.synced, true);
        self.store.update(|tx| {
            for eps in &all {
                let Some(ns) = eps.namespace() else {
                    continue;
                };
                let endpoints = endpoints_of(eps, &ns, tx);
                tx.set_endpoints_of_source(&ns, &source_name(&eps.name_unchecked()), endpoints);
            }
            for (ns, names) in &removed {
                for name in names {
                    tx.del_endpoints_of_source(ns, &source_name(name));
                }
            }
            if mark_synced {
                tx.set_sync(Set::Endpoints);
            }
        });
    }
}

impl SizedIndex<k8s::Endpoints> for EndpointsIndex {
    fn size(&self, namespace: &str) -> usize {
        self.names.len(namespace)
    }
}

/// Builds one record per ready and not-ready address. The object is named after its service.
fn endpoints_of(eps: &k8s::Endpoints, namespace: &str, tree: &Tree) -> Vec<EndpointInfo> {
    let service_name = eps.name_unchecked();
    let source_name = source_name(&service_name);

    let mut endpoints = Vec::new();
    for subset in eps.subsets.iter().flatten() {
        let port_overrides = subset
            .ports
            .iter()
            .flatten()
            .map(|p| PortName {
                name: p.name.clone().unwrap_or_default(),
                port: p.port,
            })
            .collect::<Vec<_>>();

        let addresses = subset
            .addresses
            .iter()
            .flatten()
            .map(|a| (a, true))
            .chain(subset.not_ready_addresses.iter().flatten().map(|a| (a, false)));
        for (addr, ready) in addresses {
            let node_name = addr.node_name.clone().unwrap_or_default();

            let mut ips = IpSet::default();
            if !addr.ip.is_empty() && !ips.add(&addr.ip) {
                warn!(ip = %addr.ip, "Ignoring invalid endpoint address");
            }

            endpoints.push(EndpointInfo {
                namespace: namespace.to_string(),
                service_name: service_name.clone(),
                source_name: source_name.clone(),
                topology: node_topology(tree, &node_name),
                node_name,
                pod_name: addr
                    .target_ref
                    .as_ref()
                    .filter(|r| r.kind.as_deref() == Some("Pod"))
                    .and_then(|r| r.name.clone())
                    .unwrap_or_default(),
                endpoint: Some(Endpoint {
                    ips: Some(ips),
                    local: false,
                    hostname: addr.hostname.clone().unwrap_or_default(),
                    port_overrides: port_overrides.clone(),
                }),
                conditions: Some(EndpointConditions {
                    ready,
                    serving: ready,
                    terminating: false,
                }),
                hash: 0,
                hint_zones: vec![],
            });
        }
    }
    endpoints
}
