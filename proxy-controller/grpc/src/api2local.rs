//! Drives a local sink from the node view served by another controller.

use crate::proto::endpoints_client::EndpointsClient;
use anyhow::{Context, Result};
use kpng_proxy_controller_core::{
    api::{op_item::Op, WatchReq},
    localsink::LocalSink,
};
use tokio::{sync::mpsc, time};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_BACKOFF: time::Duration = time::Duration::from_secs(5);

pub struct Api2Local<S> {
    target: String,
    sink: S,
    backoff: time::Duration,
}

// === impl Api2Local ===

impl<S: LocalSink> Api2Local<S> {
    pub fn new(target: impl Into<String>, sink: S) -> Self {
        Self {
            target: target.into(),
            sink,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: time::Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Forwards ops to the sink until `cancel` fires.
    ///
    /// The sink is reset before every reconnection, since the new stream starts from scratch.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.sink.setup();

        let mut reconnect = false;
        loop {
            if std::mem::replace(&mut reconnect, true) {
                self.sink.reset();
            }

            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                res = self.watch() => res,
            };
            match res {
                Ok(()) => info!(server = %self.target, "Local watch ended"),
                Err(error) => warn!(
                    server = %self.target,
                    error = %format!("{error:#}"),
                    "Local watch failed"
                ),
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = time::sleep(self.backoff) => {}
            }
        }
    }

    async fn watch(&mut self) -> Result<()> {
        let mut client = EndpointsClient::connect(self.target.clone())
            .await
            .with_context(|| format!("failed to connect to {}", self.target))?;

        let node_name = self.sink.wait_request().await?;
        info!(server = %self.target, node = %node_name, "Watching node state");
        let (requests, rx) = mpsc::channel(1);
        requests.send(WatchReq { node_name }).await?;
        let mut ops = client
            .watch(ReceiverStream::new(rx))
            .await
            .context("failed to start watch")?
            .into_inner();

        while let Some(op) = ops.message().await? {
            let sync = matches!(op.op, Some(Op::Sync(_)));
            self.sink.send(op).await?;
            if sync {
                let node_name = self.sink.wait_request().await?;
                requests.send(WatchReq { node_name }).await?;
            }
        }
        Ok(())
    }
}
