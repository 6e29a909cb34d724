use crate::{core, grpc, index, k8s};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use parking_lot::RwLock;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{info, info_span, instrument, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "kpng", about = "A Kubernetes network proxy controller")]
pub struct Args {
    #[clap(long, default_value = "kpng=info,warn", env = "KPNG_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Where cluster state is read from.
    #[clap(long, value_enum, default_value = "kube")]
    source: Source,

    /// The state file read by the `file` source.
    #[clap(long)]
    input_file: Option<PathBuf>,

    /// The global API of another controller, read by the `api` source.
    #[clap(long, env = "KPNG_API")]
    api: Option<String>,

    /// Reads legacy Endpoints instead of EndpointSlices.
    #[clap(long)]
    use_endpoints: bool,

    /// Only handles the services that name this proxy.
    ///
    /// Without a name, only the services that do not name any proxy are handled.
    #[clap(long, env = "KPNG_SERVICE_PROXY_NAME")]
    service_proxy_name: Option<String>,

    /// Globs of the service labels to keep.
    #[clap(long, value_delimiter = ',')]
    service_labels: Vec<String>,

    /// Globs of the service annotations to keep.
    #[clap(long, value_delimiter = ',')]
    service_annotations: Vec<String>,

    /// Globs of the node labels to keep. Endpoint topology is drawn from them.
    #[clap(
        long,
        value_delimiter = ',',
        default_value = "kubernetes.io/hostname,topology.kubernetes.io/zone,topology.kubernetes.io/region"
    )]
    node_labels: Vec<String>,

    /// Globs of the node annotations to keep.
    #[clap(long, value_delimiter = ',')]
    node_annotations: Vec<String>,

    /// Serves the local and global watch APIs.
    #[clap(long)]
    grpc_addr: Option<SocketAddr>,

    /// Writes the global state to this file whenever it changes.
    #[clap(long)]
    output_file: Option<PathBuf>,

    /// Logs the state selected for this node whenever it changes.
    #[clap(long, env = "NODE_NAME")]
    node_name: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum Source {
    /// Watches the Kubernetes API.
    Kube,
    /// Polls a state file.
    File,
    /// Mirrors another controller.
    Api,
}

/// The consumers of the store.
struct Outputs {
    grpc_addr: Option<SocketAddr>,
    grpc_metrics: grpc::GrpcServerMetricsFamily,
    output_file: Option<PathBuf>,
    node_name: Option<String>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            source,
            input_file,
            api,
            use_endpoints,
            service_proxy_name,
            service_labels,
            service_annotations,
            node_labels,
            node_annotations,
            grpc_addr,
            output_file,
            node_name,
        } = self;

        let config = index::Config {
            use_slices: !use_endpoints,
            service_proxy_name,
            service_label_globs: service_labels,
            service_annotation_globs: service_annotations,
            node_label_globs: node_labels,
            node_annotation_globs: node_annotations,
        };

        // All sources feed one store, which all outputs read.
        let store = core::proxystore::Store::shared();

        let mut prom = <Registry>::default();
        core::proxystore::metrics::register(prom.sub_registry_with_prefix("store"), store.clone());
        let grpc_metrics =
            grpc::GrpcServerMetricsFamily::register(prom.sub_registry_with_prefix("grpc_server"));
        let outputs = Outputs {
            grpc_addr,
            grpc_metrics,
            output_file,
            node_name,
        };

        match source {
            Source::Kube => {
                run_kube(
                    store,
                    config,
                    prom,
                    outputs,
                    client,
                    admin,
                    log_level,
                    log_format,
                )
                .await
            }
            Source::File => {
                let path = input_file.context("--input-file is required by the file source")?;
                log_format.try_init(log_level)?;
                let (shutdown, drain) = kubert::shutdown::sigint_or_sigterm()?;

                let cancel = cancel_on(drain.clone());
                tokio::spawn(
                    core::jobs::file2store::File2Store::new(path, store.clone())
                        .run(cancel)
                        .instrument(info_span!("file2store")),
                );
                outputs.spawn(store.clone(), drain);

                await_shutdown(shutdown, store).await
            }
            Source::Api => {
                let target = api.context("--api is required by the api source")?;
                log_format.try_init(log_level)?;
                let (shutdown, drain) = kubert::shutdown::sigint_or_sigterm()?;

                let cancel = cancel_on(drain.clone());
                tokio::spawn(
                    grpc::api2store::Api2Store::new(target, store.clone())
                        .run(cancel)
                        .instrument(info_span!("api2store")),
                );
                outputs.spawn(store.clone(), drain);

                await_shutdown(shutdown, store).await
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_kube(
    store: Arc<core::proxystore::Store>,
    config: index::Config,
    mut prom: Registry,
    outputs: Outputs,
    client: kubert::ClientArgs,
    admin: kubert::AdminArgs,
    log_level: kubert::LogFilter,
    log_format: kubert::LogFormat,
) -> Result<()> {
    // Build the indexes before the runtime takes the registry.
    let services = index::IndexMetrics::register(
        Arc::new(RwLock::new(index::ServiceIndex::new(store.clone(), &config)?)),
        prom.sub_registry_with_prefix("service_index"),
    )
    .shared();
    let nodes = index::IndexMetrics::register(
        Arc::new(RwLock::new(index::NodeIndex::new(store.clone(), &config)?)),
        prom.sub_registry_with_prefix("node_index"),
    )
    .shared();
    let slices = config.use_slices.then(|| {
        index::IndexMetrics::register(
            Arc::new(RwLock::new(index::SliceIndex::new(store.clone()))),
            prom.sub_registry_with_prefix("endpoint_slice_index"),
        )
        .shared()
    });
    let endpoints = (!config.use_slices).then(|| {
        index::IndexMetrics::register(
            Arc::new(RwLock::new(index::EndpointsIndex::new(store.clone()))),
            prom.sub_registry_with_prefix("endpoints_index"),
        )
        .shared()
    });
    let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

    let mut runtime = kubert::Runtime::builder()
        .with_log(log_level, log_format)
        .with_metrics(rt_metrics)
        .with_admin(admin.into_builder().with_prometheus(prom))
        .with_client(client)
        .build()
        .await?;

    // Spawn resource watches.

    let selector = config.service_selector();
    info!(%selector, "Watching services");
    let svcs =
        runtime.watch_all::<k8s::Service>(watcher::Config::default().labels(&selector));
    tokio::spawn(
        kubert::index::namespaced(services, svcs).instrument(info_span!("services")),
    );

    if let Some(slices) = slices {
        let events = runtime.watch_all::<k8s::EndpointSlice>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(slices, events).instrument(info_span!("endpointslices")),
        );
    }
    if let Some(endpoints) = endpoints {
        let events = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(endpoints, events).instrument(info_span!("endpoints")),
        );
    }

    let node_events = runtime.watch_all::<k8s::Node>(watcher::Config::default());
    tokio::spawn(kubert::index::cluster(nodes, node_events).instrument(info_span!("nodes")));

    outputs.spawn(store.clone(), runtime.shutdown_handle());

    // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
    // complete before exiting.
    let res = runtime.run().await;
    store.close();
    if res.is_err() {
        bail!("Aborted");
    }

    Ok(())
}

async fn await_shutdown(
    shutdown: kubert::shutdown::Shutdown,
    store: Arc<core::proxystore::Store>,
) -> Result<()> {
    let res = shutdown.signaled().await;
    store.close();
    if res.is_err() {
        bail!("Aborted");
    }
    Ok(())
}

/// Cancels the returned token when shutdown begins.
fn cancel_on(drain: drain::Watch) -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        let _release = drain.signaled().await;
        token.cancel();
    });
    cancel
}

// === impl Outputs ===

impl Outputs {
    fn spawn(self, store: Arc<core::proxystore::Store>, drain: drain::Watch) {
        let cancel = cancel_on(drain.clone());

        if let Some(path) = self.output_file {
            let job = core::jobs::store2file::Store2File::new(path, store.clone());
            let cancel = cancel.clone();
            tokio::spawn(
                async move {
                    if let Err(error) = job.run(cancel).await {
                        warn!(error = %format!("{error:#}"), "Failed to write state file");
                    }
                }
                .instrument(info_span!("store2file")),
            );
        }

        if let Some(node_name) = self.node_name {
            let sink = core::localsink::fullstate::FullState::new(
                node_name.clone(),
                core::localsink::fullstate::log_state,
            );
            let job = core::jobs::store2localdiff::Job::new(store.clone(), sink);
            let cancel = cancel.clone();
            tokio::spawn(
                async move {
                    if let Err(error) = job.run(cancel).await {
                        if !error.is_canceled() {
                            warn!(%error, "Local watch failed");
                        }
                    }
                }
                .instrument(info_span!("local", node = %node_name)),
            );
        }

        // Run the gRPC server, serving diffs of the store.
        if let Some(addr) = self.grpc_addr {
            tokio::spawn(grpc(addr, store, self.grpc_metrics, cancel, drain));
        }
    }
}

#[instrument(skip_all, fields(port = %addr.port()))]
async fn grpc(
    addr: SocketAddr,
    store: Arc<core::proxystore::Store>,
    metrics: grpc::GrpcServerMetricsFamily,
    cancel: CancellationToken,
    drain: drain::Watch,
) -> Result<()> {
    let local_svc = grpc::LocalServer::new(store.clone(), cancel.clone(), &metrics).svc();
    let global_svc = grpc::GlobalServer::new(store, cancel, &metrics).svc();

    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::pin! {
        let srv = Server::builder()
            .add_service(local_svc)
            .add_service(global_svc)
            .serve_with_shutdown(addr, async move {
                let _ = close_rx.await;
            });
    }

    info!(%addr, "gRPC server listening");
    tokio::select! {
        res = (&mut srv) => res?,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(srv).await?
        }
    }
    Ok(())
}
