//! Feeds the proxy store from a YAML state file.

use super::{GlobalState, ServiceState};
use crate::{
    api::{EndpointConditions, EndpointInfo, Node, ServiceInfo},
    diffstore::{DiffStore, State},
    hash::hash_bytes,
    proxystore::{Set, Store},
};
use anyhow::{Context, Result};
use prost::Message;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_NAMESPACE: &str = "default";

pub struct File2Store {
    path: PathBuf,
    store: Arc<Store>,
    interval: time::Duration,
}

/// Diffs successive loads of the file.
#[derive(Debug, Default)]
struct Loader {
    nodes: DiffStore<Node>,
    services: DiffStore<ServiceInfo>,
    endpoints: DiffStore<Vec<EndpointInfo>>,
}

// === impl File2Store ===

impl File2Store {
    pub fn new(path: impl Into<PathBuf>, store: Arc<Store>) -> Self {
        Self {
            path: path.into(),
            store,
            interval: time::Duration::from_secs(1),
        }
    }

    pub fn with_interval(mut self, interval: time::Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Polls the file until `cancel` fires, reloading it whenever its modification time
    /// advances. Files that cannot be read or parsed are skipped until they change again.
    pub async fn run(self, cancel: CancellationToken) {
        let mut loader = Loader::default();
        let mut mtime = None::<SystemTime>;
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            let modified = match tokio::fs::metadata(&self.path).await {
                Ok(meta) => meta.modified().ok(),
                Err(error) => {
                    debug!(%error, path = %self.path.display(), "Failed to stat state file");
                    continue;
                }
            };
            if modified.is_some() && modified <= mtime {
                continue;
            }
            mtime = modified;

            match read_state(&self.path).await {
                Ok(state) => {
                    info!(path = %self.path.display(), "Loading state file");
                    loader.load(&self.store, state);
                }
                Err(error) => warn!(%error, path = %self.path.display(), "Ignoring state file"),
            }
        }
    }
}

pub async fn read_state(path: &Path) -> Result<GlobalState> {
    let bytes = tokio::fs::read(path).await.context("failed to read")?;
    serde_yaml::from_slice(&bytes).context("failed to parse")
}

// === impl Loader ===

impl Loader {
    fn load(&mut self, store: &Store, state: GlobalState) {
        for node in state.nodes {
            self.nodes.set_message(node.name.clone(), node);
        }

        for ServiceState {
            mut service,
            topology_keys,
            endpoints,
        } in state.services
        {
            if service.namespace.is_empty() {
                service.namespace = DEFAULT_NAMESPACE.to_string();
            }
            let key = service.key();

            if !endpoints.is_empty() {
                let endpoints = endpoints
                    .into_iter()
                    .map(|ei| EndpointInfo {
                        namespace: service.namespace.clone(),
                        service_name: service.name.clone(),
                        source_name: service.name.clone(),
                        conditions: ei.conditions.clone().or(Some(EndpointConditions {
                            ready: true,
                            ..Default::default()
                        })),
                        ..ei
                    })
                    .collect::<Vec<_>>();
                let encoded = endpoints
                    .iter()
                    .flat_map(|ei| ei.encode_to_vec())
                    .collect::<Vec<_>>();
                self.endpoints.set(key.clone(), hash_bytes(&encoded), endpoints);
            }

            self.services.set_message(
                key,
                ServiceInfo {
                    service: Some(service),
                    topology_keys,
                    hash: 0,
                },
            );
        }

        let Self {
            nodes,
            services,
            endpoints,
        } = self;
        store.update(|tx| {
            for (name, item) in nodes.updated() {
                debug!(%name, "Updated node");
                tx.set_node(item.value.clone());
            }
            for (key, item) in services.updated() {
                debug!(%key, "Updated service");
                let si = &item.value;
                tx.set_service(si.service.clone().unwrap_or_default(), si.topology_keys.clone());
            }
            for (key, item) in endpoints.updated() {
                debug!(%key, "Updated endpoints");
                if let Some((ns, name)) = key.split_once('/') {
                    tx.set_endpoints_of_source(ns, name, item.value.clone());
                }
            }

            for (key, _) in endpoints.deleted() {
                debug!(%key, "Deleted endpoints");
                if let Some((ns, name)) = key.split_once('/') {
                    tx.del_endpoints_of_source(ns, name);
                }
            }
            for (key, _) in services.deleted() {
                debug!(%key, "Deleted service");
                if let Some((ns, name)) = key.split_once('/') {
                    tx.del_service(ns, name);
                }
            }
            for (name, _) in nodes.deleted() {
                debug!(%name, "Deleted node");
                tx.del_node(name);
            }

            for set in Set::ALL {
                tx.set_sync(set);
            }
        });

        nodes.reset(State::Deleted);
        services.reset(State::Deleted);
        endpoints.reset(State::Deleted);
    }
}
