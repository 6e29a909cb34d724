//! Streams the per-node view of the store to a local sink.

use super::store2diff::{self, Sink};
use crate::{
    api::{Endpoint, Object, OpItem, Service, Set},
    diffstore::State,
    endpoints,
    hash::{hash_of, key_of},
    localsink::LocalSink,
    proxystore::{self, Store, Tree},
    watchstate::{OpSink, WatchState},
    Error,
};
use std::{collections::BTreeMap, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Endpoints with a pod name are stored in the first endpoints store, keyed by pod. Other
/// endpoints are stored in the second one, keyed by content hash.
const SETS: [Set; 3] = [Set::ServicesSet, Set::EndpointsSet, Set::EndpointsSet];

const NAMED: usize = 0;
const ANONYMOUS: usize = 1;

pub struct Job<S> {
    store: Arc<Store>,
    sink: S,
}

struct Run<S> {
    sink: S,
    node_name: String,
}

// === impl Job ===

impl<S: LocalSink> Job<S> {
    pub fn new(store: Arc<Store>, sink: S) -> Self {
        Self { store, sink }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), Error> {
        let Self { store, mut sink } = self;
        sink.setup();
        let run = Run {
            sink,
            node_name: String::new(),
        };
        store2diff::Job::new(store, SETS.to_vec(), run)
            .run(cancel)
            .await
    }
}

// === impl Run ===

#[async_trait::async_trait]
impl<S: LocalSink> OpSink for Run<S> {
    async fn send(&mut self, op: OpItem) -> Result<(), Error> {
        self.sink.send(op).await
    }
}

#[async_trait::async_trait]
impl<S: LocalSink> Sink for Run<S> {
    async fn wait(&mut self) -> Result<(), Error> {
        self.node_name = self.sink.wait_request().await?;
        Ok(())
    }

    fn update(&mut self, tree: &Tree, w: &mut WatchState) {
        if !tree.all_synced() {
            return;
        }

        for (_, value) in tree.each(proxystore::Set::Services) {
            let Some(info) = value.as_service() else {
                continue;
            };
            let Some(service) = info.service.as_ref() else {
                continue;
            };
            let service_key = service.key();
            w.store_for(Set::ServicesSet).set(
                service_key.clone(),
                info.hash,
                Object::Service(Arc::new(Service::clone(service))),
            );

            // Dual-stack endpoints of a pod may come from several slices.
            let mut selected = BTreeMap::<(usize, String), Endpoint>::new();
            for ei in endpoints::for_node(tree, info, &self.node_name) {
                let Some(endpoint) = ei.endpoint else {
                    continue;
                };
                let key = if ei.pod_name.is_empty() {
                    (ANONYMOUS, format!("{service_key}/{}", key_of(ei.hash)))
                } else {
                    (NAMED, format!("{service_key}/{}", ei.pod_name))
                };
                selected
                    .entry(key)
                    .and_modify(|ep| merge(ep, &endpoint))
                    .or_insert(endpoint);
            }
            for ((n, key), endpoint) in selected {
                let hash = hash_of(&endpoint);
                w.store_for_n(Set::EndpointsSet, n)
                    .set(key, hash, Object::Endpoint(Arc::new(endpoint)));
            }
        }
    }

    async fn send_diff(&mut self, w: &mut WatchState) -> bool {
        let mut count = 0;
        count += w.send_updates(&mut *self, Set::ServicesSet).await;
        count += w.send_deletes_n(&mut *self, Set::EndpointsSet, ANONYMOUS).await;
        count += w.send_updates_n(&mut *self, Set::EndpointsSet, NAMED).await;
        count += w.send_deletes_n(&mut *self, Set::EndpointsSet, NAMED).await;
        count += w.send_updates_n(&mut *self, Set::EndpointsSet, ANONYMOUS).await;
        count += w.send_deletes(&mut *self, Set::ServicesSet).await;
        w.reset(State::Deleted);
        count != 0
    }
}

fn merge(ep: &mut Endpoint, other: &Endpoint) {
    let ips = ep.ips.get_or_insert_with(Default::default);
    for ip in other.ips.iter().flat_map(|ips| ips.iter()) {
        ips.add(ip);
    }
    ep.local |= other.local;
    for po in &other.port_overrides {
        if !ep.port_overrides.iter().any(|p| p.name == po.name) {
            ep.port_overrides.push(po.clone());
        }
    }
}

#[cfg(test)]
mod tests;
