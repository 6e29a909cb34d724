//! Streams the cluster-wide view of the store.

use super::store2diff::{self, Sink};
use crate::{
    api::{Object, OpItem},
    diffstore::State,
    proxystore::{Set, Store, Tree},
    watchstate::{OpSink, WatchState},
    Error,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A consumer of the global view.
#[async_trait::async_trait]
pub trait GlobalSink: OpSink {
    /// Waits until the consumer wants the next diff.
    async fn wait_request(&mut self) -> Result<(), Error>;
}

pub struct Job<S> {
    store: Arc<Store>,
    sink: S,
}

struct Run<S>(S);

// === impl Job ===

impl<S: GlobalSink> Job<S> {
    pub fn new(store: Arc<Store>, sink: S) -> Self {
        Self { store, sink }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), Error> {
        let sets = Set::ALL.iter().map(Set::global).collect();
        store2diff::Job::new(self.store, sets, Run(self.sink))
            .run(cancel)
            .await
    }
}

// === impl Run ===

#[async_trait::async_trait]
impl<S: GlobalSink> OpSink for Run<S> {
    async fn send(&mut self, op: OpItem) -> Result<(), Error> {
        self.0.send(op).await
    }
}

#[async_trait::async_trait]
impl<S: GlobalSink> Sink for Run<S> {
    async fn wait(&mut self) -> Result<(), Error> {
        self.0.wait_request().await
    }

    fn update(&mut self, tree: &Tree, w: &mut WatchState) {
        if !tree.all_synced() {
            return;
        }

        for set in Set::ALL {
            let store = w.store_for(set.global());
            for (key, value) in tree.each(set) {
                store.set(key.path(), value.hash(), Object::from(value.clone()));
            }
        }
    }

    async fn send_diff(&mut self, w: &mut WatchState) -> bool {
        let mut count = 0;
        for set in Set::ALL {
            count += w.send_updates(&mut *self, set.global()).await;
        }
        for set in Set::ALL.into_iter().rev() {
            count += w.send_deletes(&mut *self, set.global()).await;
        }
        w.reset(State::Deleted);
        count != 0
    }
}
