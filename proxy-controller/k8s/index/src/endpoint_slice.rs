use crate::{metrics::SizedIndex, Names};
use kpng_proxy_controller_core::{
    api::{Endpoint, EndpointConditions, EndpointInfo, IpSet, PortName},
    proxystore::{Set, Store, Tree},
};
use kpng_proxy_controller_k8s_api::{self as k8s, labels, ResourceExt};
use kubert::index::NamespacedRemoved;
use std::sync::Arc;
use tracing::{debug, info_span, warn};

/// Projects `EndpointSlice`s. Each slice is the source of its endpoint records.
#[derive(Debug)]
pub struct SliceIndex {
    store: Arc<Store>,
    names: Names,
    synced: bool,
}

// === impl SliceIndex ===

impl SliceIndex {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            names: Names::default(),
            synced: false,
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::EndpointSlice> for SliceIndex {
    fn apply(&mut self, slice: k8s::EndpointSlice) {
        let Some(ns) = slice.namespace() else {
            return;
        };
        let name = slice.name_unchecked();
        let _span = info_span!("apply", %ns, %name).entered();

        self.names.insert(ns.clone(), name.clone());
        self.store.update(|tx| match endpoints_of(&slice, tx) {
            Some(endpoints) => {
                debug!(endpoints = endpoints.len(), "Updating endpoints");
                tx.set_endpoints_of_source(&ns, &name, endpoints);
            }
            None => {
                debug!("Ignoring slice without a service");
                tx.del_endpoints_of_source(&ns, &name);
            }
        });
    }

    fn delete(&mut self, ns: String, name: String) {
        let _span = info_span!("delete", %ns, %name).entered();

        self.names.remove(&ns, &name);
        debug!("Deleting endpoints");
        self.store
            .update(|tx| tx.del_endpoints_of_source(&ns, &name));
    }

    fn reset(&mut self, slices: Vec<k8s::EndpointSlice>, removed: NamespacedRemoved) {
        let _span = info_span!("reset").entered();
        debug!(slices = slices.len(), "Resetting endpoints");

        for slice in &slices {
            if let Some(ns) = slice.namespace() {
                self.names.insert(ns, slice.name_unchecked());
            }
        }
        for (ns, names) in &removed {
            for name in names {
                self.names.remove(ns, name);
            }
        }

        let mark_synced = !std::mem::replace(&mut self.synced, true);
        self.store.update(|tx| {
            for slice in &slices {
                let Some(ns) = slice.namespace() else {
                    continue;
                };
                let name = slice.name_unchecked();
                match endpoints_of(slice, tx) {
                    Some(endpoints) => tx.set_endpoints_of_source(&ns, &name, endpoints),
                    None => tx.del_endpoints_of_source(&ns, &name),
                }
            }
            for (ns, names) in &removed {
                for name in names {
                    tx.del_endpoints_of_source(ns, name);
                }
            }
            if mark_synced {
                tx.set_sync(Set::Endpoints);
            }
        });
    }
}

impl SizedIndex<k8s::EndpointSlice> for SliceIndex {
    fn size(&self, namespace: &str) -> usize {
        self.names.len(namespace)
    }
}

/// Builds the endpoint records of a slice, or `None` if the slice names no service.
fn endpoints_of(slice: &k8s::EndpointSlice, tree: &Tree) -> Option<Vec<EndpointInfo>> {
    let service_name = slice
        .labels()
        .get(labels::SERVICE_NAME)
        .filter(|n| !n.is_empty())?;
    let namespace = slice.namespace()?;
    let source_name = slice.name_unchecked();

    let port_overrides = slice
        .ports
        .iter()
        .flatten()
        .filter_map(|p| {
            Some(PortName {
                name: p.name.clone().unwrap_or_default(),
                port: p.port?,
            })
        })
        .collect::<Vec<_>>();

    let endpoints = slice
        .endpoints
        .iter()
        .map(|ep| {
            let node_name = ep.node_name.clone().unwrap_or_default();

            let mut topology = match ep.deprecated_topology.as_ref() {
                Some(topology) if !topology.is_empty() => topology.clone(),
                _ => tree
                    .get_node(&node_name)
                    .map(|n| n.labels.clone())
                    .unwrap_or_default(),
            };
            if !node_name.is_empty() {
                topology
                    .entry(labels::HOSTNAME.to_string())
                    .or_insert_with(|| node_name.clone());
            }
            if let Some(zone) = ep.zone.as_ref().filter(|z| !z.is_empty()) {
                topology.insert(labels::ZONE.to_string(), zone.clone());
            }

            let mut ips = IpSet::default();
            for addr in &ep.addresses {
                if !ips.add(addr) {
                    warn!(%addr, "Ignoring invalid endpoint address");
                }
            }

            let mut hint_zones = ep
                .hints
                .iter()
                .flat_map(|h| h.for_zones.iter().flatten())
                .map(|z| z.name.clone())
                .collect::<Vec<_>>();
            hint_zones.sort();

            let conditions = ep.conditions.as_ref();
            let ready = conditions.and_then(|c| c.ready) == Some(true);
            EndpointInfo {
                namespace: namespace.clone(),
                service_name: service_name.clone(),
                source_name: source_name.clone(),
                node_name,
                pod_name: ep
                    .target_ref
                    .as_ref()
                    .filter(|r| r.kind.as_deref() == Some("Pod"))
                    .and_then(|r| r.name.clone())
                    .unwrap_or_default(),
                topology,
                endpoint: Some(Endpoint {
                    ips: Some(ips),
                    local: false,
                    hostname: ep.hostname.clone().unwrap_or_default(),
                    port_overrides: port_overrides.clone(),
                }),
                conditions: Some(EndpointConditions {
                    ready,
                    serving: conditions.and_then(|c| c.serving).unwrap_or(ready),
                    terminating: conditions.and_then(|c| c.terminating) == Some(true),
                }),
                hash: 0,
                hint_zones,
            }
        })
        .collect();

    Some(endpoints)
}
