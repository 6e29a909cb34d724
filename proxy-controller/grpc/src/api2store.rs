//! Mirrors the store of another controller through its global watch API.

use crate::proto::global_client::GlobalClient;
use anyhow::{Context, Result};
use kpng_proxy_controller_core::{
    api::{self, op_item::Op, GlobalWatchReq},
    proxystore::{Key, Set, Store, Tx, Value},
};
use std::sync::Arc;
use tokio::{sync::mpsc, time};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_BACKOFF: time::Duration = time::Duration::from_secs(5);

pub struct Api2Store {
    target: String,
    store: Arc<Store>,
    backoff: time::Duration,
}

// === impl Api2Store ===

impl Api2Store {
    /// Mirrors the controller serving at `target`, e.g. `http://10.0.0.1:12090`.
    pub fn new(target: impl Into<String>, store: Arc<Store>) -> Self {
        Self {
            target: target.into(),
            store,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: time::Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Watches the remote store until `cancel` fires, reconnecting after every failure.
    ///
    /// Each diff is applied in a single update, so readers never observe a partial diff. The
    /// store is closed on return.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.watch() => res,
            };
            match res {
                Ok(()) => info!(server = %self.target, "Global watch ended"),
                Err(error) => warn!(
                    server = %self.target,
                    error = %format!("{error:#}"),
                    "Global watch failed"
                ),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(self.backoff) => {}
            }
        }

        debug!("Closing store");
        self.store.close();
    }

    async fn watch(&self) -> Result<()> {
        let mut client = GlobalClient::connect(self.target.clone())
            .await
            .with_context(|| format!("failed to connect to {}", self.target))?;

        let (requests, rx) = mpsc::channel(1);
        requests.send(GlobalWatchReq {}).await?;
        let mut ops = client
            .watch(ReceiverStream::new(rx))
            .await
            .context("failed to start watch")?
            .into_inner();
        info!(server = %self.target, "Watching global state");

        let mut batch = Vec::new();
        while let Some(item) = ops.message().await? {
            match item.op {
                Some(Op::Sync(_)) => {
                    let batch = std::mem::take(&mut batch);
                    debug!(ops = batch.len(), "Applying diff");
                    self.store.update(|tx| apply(tx, batch));
                    requests.send(GlobalWatchReq {}).await?;
                }
                Some(op) => batch.push(op),
                None => {}
            }
        }
        Ok(())
    }
}

/// Applies one diff and marks every set synced.
fn apply(tx: &mut Tx<'_>, ops: Vec<Op>) {
    for op in ops {
        match op {
            Op::Reset(_) => tx.reset(),
            Op::Set(value) => {
                let Some((set, key)) = value.r#ref.as_ref().and_then(resolve) else {
                    continue;
                };
                match Value::decode(set, &value.bytes) {
                    Ok(value) => tx.set_raw(key, value),
                    Err(error) => {
                        warn!(%set, path = %key.path(), %error, "Ignoring invalid value")
                    }
                }
            }
            Op::Delete(r) => {
                if let Some((_, key)) = resolve(&r) {
                    tx.del_raw(&key);
                }
            }
            Op::Sync(_) => {}
        }
    }

    for set in Set::ALL {
        tx.set_sync(set);
    }
}

fn resolve(r: &api::Ref) -> Option<(Set, Key)> {
    let Some(set) = api::Set::try_from(r.set).ok().and_then(Set::from_global) else {
        warn!(set = r.set, path = %r.path, "Ignoring op of an unexpected set");
        return None;
    };
    let Some(key) = Key::from_path(set, &r.path) else {
        warn!(%set, path = %r.path, "Ignoring op with an invalid path");
        return None;
    };
    Some((set, key))
}
