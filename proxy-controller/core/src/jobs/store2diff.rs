//! Drives a watch: waits for the consumer, then streams the next diff of the store.

use crate::{
    api::Set,
    proxystore::{Store, Tree},
    watchstate::{OpSink, WatchState},
    Error,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A watch consumer, and the projection of the store it watches.
#[async_trait::async_trait]
pub trait Sink: OpSink {
    /// Waits until the consumer is ready for the next diff.
    async fn wait(&mut self) -> Result<(), Error>;

    /// Projects a snapshot of the store into the watch's diff stores.
    fn update(&mut self, tree: &Tree, w: &mut WatchState);

    /// Sends the pending diff. Returns whether any op was sent.
    async fn send_diff(&mut self, w: &mut WatchState) -> bool;
}

pub struct Job<S> {
    store: Arc<Store>,
    sets: Vec<Set>,
    sink: S,
}

// === impl Job ===

impl<S: Sink> Job<S> {
    pub fn new(store: Arc<Store>, sets: Vec<Set>, sink: S) -> Self {
        Self { store, sets, sink }
    }

    /// Serves diffs until the store closes, the sink fails or `cancel` fires.
    ///
    /// The first diff is preceded by a `Reset`; every diff is terminated by a `Sync`. Store
    /// revisions that do not change the sink's projection are skipped.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), Error> {
        let Self {
            store,
            sets,
            mut sink,
        } = self;
        let mut w = WatchState::new(sets);
        let mut rev = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Canceled);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Canceled),
                res = sink.wait() => res?,
            }

            if rev == 0 {
                w.send_reset(&mut sink).await;
            }

            let mut updated = false;
            while !updated {
                let (next, closed) = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Canceled),
                    res = store.view(rev, |tree| sink.update(tree, &mut w)) => res,
                };
                if closed {
                    debug!("Store closed");
                    return Ok(());
                }
                rev = next;

                updated = sink.send_diff(&mut w).await;
                if let Some(error) = w.take_error() {
                    return Err(error);
                }
                trace!(rev, updated, "Viewed store");
            }

            w.send_sync(&mut sink).await;
            if let Some(error) = w.take_error() {
                return Err(error);
            }
        }
    }
}
