use crate::{metrics::SizedIndex, Config, Globs, Names};
use anyhow::Result;
use kpng_proxy_controller_core::{
    api::{self, ClientIpAffinity, IpFilter, IpSet, PortMapping, Protocol, ServiceIps},
    proxystore::{Set, Store},
};
use kpng_proxy_controller_k8s_api::{self as k8s, labels, IntOrString, ResourceExt};
use kubert::index::NamespacedRemoved;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info_span, warn};

/// The session affinity timeout used when a `ClientIP` affinity does not set one.
const DEFAULT_AFFINITY_TIMEOUT_SECS: i32 = 10800;

#[derive(Debug)]
pub struct ServiceIndex {
    store: Arc<Store>,
    label_globs: Globs,
    annotation_globs: Globs,
    names: Names,
    synced: bool,
}

// === impl ServiceIndex ===

impl ServiceIndex {
    pub fn new(store: Arc<Store>, config: &Config) -> Result<Self> {
        Ok(Self {
            store,
            label_globs: Globs::new(&config.service_label_globs)?,
            annotation_globs: Globs::new(&config.service_annotation_globs)?,
            names: Names::default(),
            synced: false,
        })
    }

    /// Builds the normalized service and its topology keys.
    fn project(&self, svc: k8s::Service) -> Option<(api::Service, Vec<String>)> {
        let namespace = svc.namespace()?;
        let name = svc.name_unchecked();
        let topology_keys = topology_keys(svc.annotations());
        let labels = self.label_globs.filter(svc.metadata.labels.as_ref());
        let annotations = self.annotation_globs.filter(svc.metadata.annotations.as_ref());
        let spec = svc.spec.unwrap_or_default();

        let mut ips = ServiceIps::default();
        let cluster_ips = match spec.cluster_ips {
            Some(ips) if !ips.is_empty() => ips,
            _ => spec.cluster_ip.into_iter().filter(|ip| !ip.is_empty()).collect(),
        };
        let mut cluster = IpSet::default();
        for ip in &cluster_ips {
            if ip == "None" {
                ips.headless = true;
            } else if !cluster.add(ip) {
                warn!(%namespace, %name, %ip, "Ignoring invalid cluster IP");
            }
        }
        ips.cluster_ips = Some(cluster);
        ips.external_ips = Some(ip_set(spec.external_ips.iter().flatten(), "external"));

        let load_balancer_ips = ip_set(
            svc.status
                .iter()
                .flat_map(|s| s.load_balancer.iter())
                .flat_map(|lb| lb.ingress.iter().flatten())
                .filter_map(|ingress| ingress.ip.as_ref()),
            "load balancer",
        );

        let mut ip_filters = Vec::new();
        if let Some(ranges) = spec.load_balancer_source_ranges.filter(|r| !r.is_empty()) {
            ip_filters.push(IpFilter {
                target_ips: Some(load_balancer_ips.clone()),
                source_ranges: ranges,
            });
        }
        ips.load_balancer_ips = Some(load_balancer_ips);

        let client_ip = (spec.session_affinity.as_deref() == Some("ClientIP")).then(|| {
            let timeout_seconds = spec
                .session_affinity_config
                .and_then(|c| c.client_ip)
                .and_then(|c| c.timeout_seconds)
                .unwrap_or(DEFAULT_AFFINITY_TIMEOUT_SECS);
            ClientIpAffinity { timeout_seconds }
        });

        let ports = spec
            .ports
            .into_iter()
            .flatten()
            .map(|port| {
                let (target_port, target_port_name) = match port.target_port {
                    Some(IntOrString::Int(p)) => (p, String::new()),
                    Some(IntOrString::String(name)) => (0, name),
                    None => (port.port, String::new()),
                };
                PortMapping {
                    name: port.name.unwrap_or_default(),
                    protocol: protocol(port.protocol.as_deref()) as i32,
                    port: port.port,
                    node_port: port.node_port.unwrap_or_default(),
                    target_port,
                    target_port_name,
                }
            })
            .collect();

        let service = api::Service {
            namespace,
            name,
            r#type: spec.type_.unwrap_or_else(|| "ClusterIP".to_string()),
            labels,
            annotations,
            ips: Some(ips),
            ports,
            client_ip,
            ip_filters,
            external_traffic_to_local: spec.external_traffic_policy.as_deref() == Some("Local"),
            internal_traffic_to_local: spec.internal_traffic_policy.as_deref() == Some("Local"),
        };
        Some((service, topology_keys))
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Service> for ServiceIndex {
    fn apply(&mut self, svc: k8s::Service) {
        let Some((service, topology_keys)) = self.project(svc) else {
            return;
        };
        let _span = info_span!("apply", ns = %service.namespace, name = %service.name).entered();

        self.names
            .insert(service.namespace.clone(), service.name.clone());
        debug!(?topology_keys, "Updating service");
        self.store
            .update(|tx| tx.set_service(service, topology_keys));
    }

    fn delete(&mut self, ns: String, name: String) {
        let _span = info_span!("delete", %ns, %name).entered();

        self.names.remove(&ns, &name);
        debug!("Deleting service");
        self.store.update(|tx| tx.del_service(&ns, &name));
    }

    fn reset(&mut self, svcs: Vec<k8s::Service>, removed: NamespacedRemoved) {
        let _span = info_span!("reset").entered();

        let services = svcs
            .into_iter()
            .filter_map(|svc| self.project(svc))
            .collect::<Vec<_>>();
        for (svc, _) in &services {
            self.names.insert(svc.namespace.clone(), svc.name.clone());
        }
        for (ns, names) in &removed {
            for name in names {
                self.names.remove(ns, name);
            }
        }
        debug!(services = services.len(), "Resetting services");

        let mark_synced = !std::mem::replace(&mut self.synced, true);
        self.store.update(|tx| {
            for (svc, topology_keys) in services {
                tx.set_service(svc, topology_keys);
            }
            for (ns, names) in removed {
                for name in names {
                    tx.del_service(&ns, &name);
                }
            }
            if mark_synced {
                tx.set_sync(Set::Services);
            }
        });
    }
}

impl SizedIndex<k8s::Service> for ServiceIndex {
    fn size(&self, namespace: &str) -> usize {
        self.names.len(namespace)
    }
}

fn topology_keys(annotations: &BTreeMap<String, String>) -> Vec<String> {
    annotations
        .get(labels::TOPOLOGY_KEYS_ANNOTATION)
        .map(|keys| {
            keys.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn protocol(protocol: Option<&str>) -> Protocol {
    match protocol {
        None | Some("TCP") => Protocol::Tcp,
        Some("UDP") => Protocol::Udp,
        Some("SCTP") => Protocol::Sctp,
        Some(_) => Protocol::UnknownProtocol,
    }
}

fn ip_set<'a>(ips: impl Iterator<Item = &'a String>, kind: &str) -> IpSet {
    let mut set = IpSet::default();
    for ip in ips {
        if !set.add(ip) {
            warn!(%ip, kind, "Ignoring invalid IP");
        }
    }
    set
}
