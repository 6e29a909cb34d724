use crate::{
    metrics::{GrpcServerMetricsFamily, GrpcServerRPCMetrics},
    proto::global_server::{Global, GlobalServer as Server},
    watch::{self, BoxWatchStream, WatchSink},
};
use kpng_proxy_controller_core::{
    api::GlobalWatchReq,
    jobs::store2globaldiff::{self, GlobalSink},
    proxystore::Store,
    Error,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info_span;

/// Serves the complete store, for other controllers to mirror.
#[derive(Clone, Debug)]
pub struct GlobalServer {
    store: Arc<Store>,
    cancel: CancellationToken,
    metrics: GrpcServerRPCMetrics,
}

// === impl GlobalServer ===

impl GlobalServer {
    pub fn new(
        store: Arc<Store>,
        cancel: CancellationToken,
        metrics: &GrpcServerMetricsFamily,
    ) -> Self {
        Self {
            store,
            cancel,
            metrics: metrics.bidi_stream_rpc("kpng.v1.Global", "Watch"),
        }
    }

    pub fn svc(self) -> Server<Self> {
        Server::new(self)
    }
}

#[async_trait::async_trait]
impl Global for GlobalServer {
    type WatchStream = BoxWatchStream;

    async fn watch(
        &self,
        req: tonic::Request<tonic::Streaming<GlobalWatchReq>>,
    ) -> Result<tonic::Response<BoxWatchStream>, tonic::Status> {
        let span = info_span!("global", client = ?req.remote_addr());
        let store = self.store.clone();
        let cancel = self.cancel.child_token();
        let ops = watch::serve(req.into_inner(), &self.metrics, span, move |sink| {
            store2globaldiff::Job::new(store, sink).run(cancel)
        });
        Ok(tonic::Response::new(ops))
    }
}

#[async_trait::async_trait]
impl GlobalSink for WatchSink<GlobalWatchReq> {
    async fn wait_request(&mut self) -> Result<(), Error> {
        self.next_request().await.map(|GlobalWatchReq {}| ())
    }
}
