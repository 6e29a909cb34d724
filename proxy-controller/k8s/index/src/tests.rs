mod endpoint_slice;
mod service;

use crate::{Config, NodeIndex};
use kpng_proxy_controller_core::{
    api::EndpointInfo,
    proxystore::{Set, Store},
};
use kpng_proxy_controller_k8s_api::{self as k8s, labels};
use std::{collections::BTreeMap, sync::Arc};

struct TestConfig {
    store: Arc<Store>,
    config: Config,
    _tracing: tracing::subscriber::DefaultGuard,
}

// === impl TestConfig ===

impl Default for TestConfig {
    fn default() -> Self {
        Self::from_config(Config::default())
    }
}

impl TestConfig {
    fn from_config(config: Config) -> Self {
        let _tracing = Self::init_tracing();
        Self {
            store: Store::shared(),
            config,
            _tracing,
        }
    }

    fn init_tracing() -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::TRACE)
                .finish(),
        )
    }

    fn nodes(&self) -> NodeIndex {
        NodeIndex::new(self.store.clone(), &self.config).expect("node globs must be valid")
    }

    /// The endpoint records of a service, ordered by node.
    fn endpoints_of(&self, ns: &str, svc: &str) -> Vec<EndpointInfo> {
        let mut endpoints = self.store.read(|tree| {
            tree.each_endpoint_of_service(ns, svc)
                .map(|ei| (**ei).clone())
                .collect::<Vec<_>>()
        });
        endpoints.sort_by(|a, b| a.node_name.cmp(&b.node_name));
        endpoints
    }

    fn is_synced(&self, set: Set) -> bool {
        self.store.read(|tree| tree.is_synced(set))
    }
}

fn mk_meta(ns: Option<&str>, name: &str, labels: &[(&str, &str)]) -> k8s::ObjectMeta {
    k8s::ObjectMeta {
        namespace: ns.map(str::to_string),
        name: Some(name.to_string()),
        labels: Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}

fn mk_node(name: &str, zone: &str) -> k8s::Node {
    k8s::Node {
        metadata: mk_meta(
            None,
            name,
            &[
                (labels::HOSTNAME, name),
                (labels::ZONE, zone),
                ("node.kubernetes.io/instance-type", "large"),
            ],
        ),
        ..Default::default()
    }
}

fn mk_pod_ref(name: &str) -> k8s::ObjectReference {
    k8s::ObjectReference {
        kind: Some("Pod".to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn topology(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
