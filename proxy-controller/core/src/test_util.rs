use crate::{
    api::{op_item::Op, EndpointConditions, EndpointInfo, IpSet, OpItem, Service},
    jobs::store2globaldiff::GlobalSink,
    localsink::LocalSink,
    watchstate::OpSink,
    Error,
};
use tokio::{
    sync::mpsc,
    time::{self, Duration},
};

pub(crate) fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .finish(),
    )
}

/// A sink fed with requests by the test and forwarding ops back to it.
pub(crate) struct ChannelSink {
    requests: mpsc::UnboundedReceiver<String>,
    ops: mpsc::UnboundedSender<OpItem>,
}

pub(crate) struct Handle {
    pub requests: mpsc::UnboundedSender<String>,
    pub ops: mpsc::UnboundedReceiver<OpItem>,
}

pub(crate) fn channel_sink() -> (ChannelSink, Handle) {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (ops_tx, ops_rx) = mpsc::unbounded_channel();
    let sink = ChannelSink {
        requests: req_rx,
        ops: ops_tx,
    };
    let handle = Handle {
        requests: req_tx,
        ops: ops_rx,
    };
    (sink, handle)
}

#[async_trait::async_trait]
impl OpSink for ChannelSink {
    async fn send(&mut self, op: OpItem) -> Result<(), Error> {
        self.ops.send(op).map_err(|_| Error::Closed)
    }
}

#[async_trait::async_trait]
impl LocalSink for ChannelSink {
    async fn wait_request(&mut self) -> Result<String, Error> {
        self.requests.recv().await.ok_or(Error::Closed)
    }
}

#[async_trait::async_trait]
impl GlobalSink for ChannelSink {
    async fn wait_request(&mut self) -> Result<(), Error> {
        self.requests.recv().await.map(|_| ()).ok_or(Error::Closed)
    }
}

impl Handle {
    /// Requests a diff and collects its ops, rendered as strings, up to the `Sync`.
    pub async fn next_batch(&mut self, node: &str) -> Vec<String> {
        self.requests
            .send(node.to_string())
            .expect("job must be running");
        let mut batch = vec![];
        loop {
            let op = time::timeout(Duration::from_secs(5), self.ops.recv())
                .await
                .expect("batch must complete")
                .expect("job must be running");
            let op = render(&op);
            if op == "sync" {
                return batch;
            }
            batch.push(op);
        }
    }
}

pub(crate) fn render(op: &OpItem) -> String {
    match op.op.as_ref() {
        Some(Op::Set(v)) => {
            let r = v.r#ref.clone().unwrap_or_default();
            format!("set {} {}", r.set(), r.path)
        }
        Some(Op::Delete(r)) => format!("del {} {}", r.set(), r.path),
        Some(Op::Sync(_)) => "sync".to_string(),
        Some(Op::Reset(_)) => "reset".to_string(),
        None => "none".to_string(),
    }
}

pub(crate) fn mk_service(ns: &str, name: &str) -> Service {
    Service {
        namespace: ns.to_string(),
        name: name.to_string(),
        r#type: "ClusterIP".to_string(),
        ..Default::default()
    }
}

pub(crate) fn mk_endpoint(
    ns: &str,
    service: &str,
    source: &str,
    pod: &str,
    ip: &str,
) -> EndpointInfo {
    EndpointInfo {
        namespace: ns.to_string(),
        service_name: service.to_string(),
        source_name: source.to_string(),
        pod_name: pod.to_string(),
        endpoint: Some(crate::api::Endpoint {
            ips: Some(IpSet::from_iter([ip])),
            ..Default::default()
        }),
        conditions: Some(EndpointConditions {
            ready: true,
            ..Default::default()
        }),
        ..Default::default()
    }
}
