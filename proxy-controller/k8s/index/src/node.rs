use crate::{endpoints, metrics::SizedIndex, Config, Globs};
use ahash::AHashSet as HashSet;
use anyhow::Result;
use kpng_proxy_controller_core::{
    api::{self, EndpointInfo},
    proxystore::{Set, Store, Tx},
};
use kpng_proxy_controller_k8s_api::{self as k8s, ResourceExt};
use kubert::index::ClusterRemoved;
use std::sync::Arc;
use tracing::{debug, info_span};

/// Stores nodes with their filtered labels and annotations.
///
/// When endpoints come from legacy `Endpoints`, a node's labels are also copied into the
/// topology of the endpoints it hosts.
#[derive(Debug)]
pub struct NodeIndex {
    store: Arc<Store>,
    label_globs: Globs,
    annotation_globs: Globs,
    legacy_endpoints: bool,
    names: HashSet<String>,
    synced: bool,
}

// === impl NodeIndex ===

impl NodeIndex {
    pub fn new(store: Arc<Store>, config: &Config) -> Result<Self> {
        Ok(Self {
            store,
            label_globs: Globs::new(&config.node_label_globs)?,
            annotation_globs: Globs::new(&config.node_annotation_globs)?,
            legacy_endpoints: !config.use_slices,
            names: HashSet::default(),
            synced: false,
        })
    }

    fn project(&self, node: &k8s::Node) -> api::Node {
        api::Node {
            name: node.name_unchecked(),
            labels: self.label_globs.filter(node.metadata.labels.as_ref()),
            annotations: self.annotation_globs.filter(node.metadata.annotations.as_ref()),
        }
    }

    fn set_node(&self, tx: &mut Tx<'_>, node: api::Node) {
        let name = node.name.clone();
        // Status heartbeats leave the stored labels as they are.
        let relabeled = tx
            .get_node(&name)
            .map_or(true, |stored| stored.labels != node.labels);
        tx.set_node(node);
        if self.legacy_endpoints && relabeled {
            refresh_topology(tx, &name);
        }
    }
}

impl kubert::index::IndexClusterResource<k8s::Node> for NodeIndex {
    fn apply(&mut self, node: k8s::Node) {
        let node = self.project(&node);
        let _span = info_span!("apply", name = %node.name).entered();

        self.names.insert(node.name.clone());
        debug!(labels = node.labels.len(), "Updating node");
        let this = &*self;
        this.store.update(|tx| this.set_node(tx, node));
    }

    fn delete(&mut self, name: String) {
        let _span = info_span!("delete", %name).entered();

        self.names.remove(&name);
        debug!("Deleting node");
        self.store.update(|tx| tx.del_node(&name));
    }

    fn reset(&mut self, nodes: Vec<k8s::Node>, removed: ClusterRemoved) {
        let _span = info_span!("reset").entered();
        debug!(nodes = nodes.len(), "Resetting nodes");

        let nodes = nodes.iter().map(|n| self.project(n)).collect::<Vec<_>>();
        for node in &nodes {
            self.names.insert(node.name.clone());
        }
        for name in &removed {
            self.names.remove(name);
        }

        let mark_synced = !std::mem::replace(&mut self.synced, true);
        let this = &*self;
        this.store.update(|tx| {
            for node in nodes {
                this.set_node(tx, node);
            }
            for name in &removed {
                tx.del_node(name);
            }
            if mark_synced {
                tx.set_sync(Set::Nodes);
            }
        });
    }
}

impl SizedIndex<k8s::Node> for NodeIndex {
    fn size(&self, _: &str) -> usize {
        self.names.len()
    }
}

/// Copies the stored labels of a node into the topology of the legacy endpoints it hosts.
///
/// Updated records go through [`Tx::set_endpoint`] so they are rekeyed by their new content.
fn refresh_topology(tx: &mut Tx<'_>, node_name: &str) {
    let topology = endpoints::node_topology(tx, node_name);
    let stale = tx
        .each(Set::Endpoints)
        .filter(|(k, _)| k.name.is_empty() && endpoints::is_legacy_source(&k.source))
        .filter_map(|(_, v)| v.as_endpoint())
        .filter(|ei| ei.node_name == node_name && ei.topology != topology)
        .map(|ei| EndpointInfo {
            topology: topology.clone(),
            ..(**ei).clone()
        })
        .collect::<Vec<_>>();

    if !stale.is_empty() {
        debug!(endpoints = stale.len(), "Refreshing endpoint topology");
    }
    for ei in stale {
        tx.set_endpoint(ei);
    }
}
