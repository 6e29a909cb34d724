use crate::{
    metrics::{GrpcServerMetricsFamily, GrpcServerRPCMetrics},
    proto::endpoints_server::{Endpoints, EndpointsServer},
    watch::{self, BoxWatchStream, WatchSink},
};
use kpng_proxy_controller_core::{
    api::WatchReq, jobs::store2localdiff, localsink::LocalSink, proxystore::Store, Error,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info_span;

/// Serves the view of the store selected for each requesting node.
#[derive(Clone, Debug)]
pub struct LocalServer {
    store: Arc<Store>,
    cancel: CancellationToken,
    metrics: GrpcServerRPCMetrics,
}

// === impl LocalServer ===

impl LocalServer {
    pub fn new(
        store: Arc<Store>,
        cancel: CancellationToken,
        metrics: &GrpcServerMetricsFamily,
    ) -> Self {
        Self {
            store,
            cancel,
            metrics: metrics.bidi_stream_rpc("kpng.v1.Endpoints", "Watch"),
        }
    }

    pub fn svc(self) -> EndpointsServer<Self> {
        EndpointsServer::new(self)
    }
}

#[async_trait::async_trait]
impl Endpoints for LocalServer {
    type WatchStream = BoxWatchStream;

    async fn watch(
        &self,
        req: tonic::Request<tonic::Streaming<WatchReq>>,
    ) -> Result<tonic::Response<BoxWatchStream>, tonic::Status> {
        let span = info_span!("local", client = ?req.remote_addr());
        let store = self.store.clone();
        let cancel = self.cancel.child_token();
        let ops = watch::serve(req.into_inner(), &self.metrics, span, move |sink| {
            store2localdiff::Job::new(store, sink).run(cancel)
        });
        Ok(tonic::Response::new(ops))
    }
}

#[async_trait::async_trait]
impl LocalSink for WatchSink<WatchReq> {
    async fn wait_request(&mut self) -> Result<String, Error> {
        let WatchReq { node_name } = self.next_request().await?;
        Ok(node_name)
    }
}
