use crate::metrics::{GrpcServerRPCMetrics, MessageObserver};
use kpng_proxy_controller_core::{api::OpItem, watchstate::OpSink, Error};
use std::{future::Future, pin::Pin};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream};
use tracing::{debug, info, Instrument};

pub type BoxWatchStream =
    Pin<Box<dyn Stream<Item = Result<OpItem, tonic::Status>> + Send + Sync>>;

/// Bounds the ops buffered for a slow client. The job waits when it is full.
const OPS_BUFFER: usize = 1024;

/// Feeds a watch job with the requests of one client and streams its ops back.
pub(crate) struct WatchSink<R> {
    requests: tonic::Streaming<R>,
    ops: mpsc::Sender<Result<OpItem, tonic::Status>>,
    messages: MessageObserver,
}

/// Spawns the job built by `job` and returns the stream of the ops it sends.
///
/// The stream ends when the job does. Job failures other than the client going away are
/// reported to the client as a status.
pub(crate) fn serve<R, F, J>(
    requests: tonic::Streaming<R>,
    metrics: &GrpcServerRPCMetrics,
    span: tracing::Span,
    job: F,
) -> BoxWatchStream
where
    F: FnOnce(WatchSink<R>) -> J,
    J: Future<Output = Result<(), Error>> + Send + 'static,
{
    let (observer, messages) = metrics.start();
    let (tx, rx) = mpsc::channel(OPS_BUFFER);
    let job = job(WatchSink {
        requests,
        ops: tx.clone(),
        messages,
    });

    tokio::spawn(
        async move {
            debug!("Watch started");
            let code = match job.await {
                Ok(()) => {
                    debug!("Store closed");
                    tonic::Code::Ok
                }
                Err(Error::Canceled) => {
                    debug!("Watch canceled");
                    tonic::Code::Ok
                }
                Err(Error::Closed) => {
                    debug!("Client went away");
                    tonic::Code::Cancelled
                }
                Err(error) => {
                    info!(%error, "Watch failed");
                    let _ = tx.send(Err(tonic::Status::internal(error.to_string()))).await;
                    tonic::Code::Internal
                }
            };
            observer.end(code);
        }
        .instrument(span),
    );

    Box::pin(ReceiverStream::new(rx))
}

// === impl WatchSink ===

impl<R> WatchSink<R> {
    /// Waits for the client's next request.
    pub(crate) async fn next_request(&mut self) -> Result<R, Error> {
        match self.requests.message().await {
            Ok(Some(req)) => {
                self.messages.msg_received();
                Ok(req)
            }
            Ok(None) => Err(Error::Closed),
            Err(status) => Err(Error::recv(status)),
        }
    }
}

#[async_trait::async_trait]
impl<R: Send> OpSink for WatchSink<R> {
    async fn send(&mut self, op: OpItem) -> Result<(), Error> {
        self.ops.send(Ok(op)).await.map_err(|_| Error::Closed)?;
        self.messages.msg_sent();
        Ok(())
    }
}
