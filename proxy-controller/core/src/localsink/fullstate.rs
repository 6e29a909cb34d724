//! A local sink handing the complete per-node state to a callback after every batch.

use super::LocalSink;
use crate::{
    api::{op_item::Op, Endpoint, OpItem, Ref, Service, Set},
    watchstate::OpSink,
    Error,
};
use prost::Message;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info, warn};

/// A service and the endpoints the node should use for it.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceEndpoints {
    pub service: Arc<Service>,
    pub endpoints: Vec<Arc<Endpoint>>,
}

pub struct FullState<F> {
    node_name: String,
    services: BTreeMap<String, Arc<Service>>,
    endpoints: BTreeMap<String, Arc<Endpoint>>,
    callback: F,
}

// === impl FullState ===

impl<F> FullState<F>
where
    F: FnMut(&[ServiceEndpoints]) + Send,
{
    pub fn new(node_name: impl Into<String>, callback: F) -> Self {
        Self {
            node_name: node_name.into(),
            services: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            callback,
        }
    }

    fn set(&mut self, r: Ref, bytes: &[u8]) {
        let res = match Set::try_from(r.set) {
            Ok(Set::ServicesSet) => Service::decode(bytes).map(|svc| {
                self.services.insert(r.path, Arc::new(svc));
            }),
            Ok(Set::EndpointsSet) => Endpoint::decode(bytes).map(|ep| {
                self.endpoints.insert(r.path, Arc::new(ep));
            }),
            _ => {
                warn!(set = r.set, path = %r.path, "Ignoring value of an unexpected set");
                return;
            }
        };
        if let Err(error) = res {
            warn!(%error, "Ignoring invalid value");
        }
    }

    fn delete(&mut self, r: Ref) {
        match Set::try_from(r.set) {
            Ok(Set::ServicesSet) => {
                self.services.remove(&r.path);
            }
            Ok(Set::EndpointsSet) => {
                self.endpoints.remove(&r.path);
            }
            _ => warn!(set = r.set, path = %r.path, "Ignoring delete of an unexpected set"),
        }
    }

    /// Groups endpoints under their service. Endpoint paths extend their service's path.
    fn state(&self) -> Vec<ServiceEndpoints> {
        self.services
            .iter()
            .map(|(key, service)| {
                let prefix = format!("{key}/");
                let endpoints = self
                    .endpoints
                    .range(prefix.clone()..)
                    .take_while(|(k, _)| k.starts_with(&prefix))
                    .map(|(_, ep)| ep.clone())
                    .collect();
                ServiceEndpoints {
                    service: service.clone(),
                    endpoints,
                }
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl<F> OpSink for FullState<F>
where
    F: FnMut(&[ServiceEndpoints]) + Send,
{
    async fn send(&mut self, op: OpItem) -> Result<(), Error> {
        match op.op {
            Some(Op::Set(value)) => {
                if let Some(r) = value.r#ref {
                    self.set(r, &value.bytes);
                }
            }
            Some(Op::Delete(r)) => self.delete(r),
            Some(Op::Reset(_)) => LocalSink::reset(self),
            Some(Op::Sync(_)) => {
                let state = self.state();
                debug!(services = state.len(), "Applying state");
                (self.callback)(&state);
            }
            None => {}
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<F> LocalSink for FullState<F>
where
    F: FnMut(&[ServiceEndpoints]) + Send,
{
    async fn wait_request(&mut self) -> Result<String, Error> {
        Ok(self.node_name.clone())
    }

    fn reset(&mut self) {
        self.services.clear();
        self.endpoints.clear();
    }
}

/// Logs the state of a node.
pub fn log_state(state: &[ServiceEndpoints]) {
    info!(services = state.len(), "Node state");
    for ServiceEndpoints { service, endpoints } in state {
        let ips = endpoints
            .iter()
            .flat_map(|ep| ep.ips.iter().flat_map(|ips| ips.iter()))
            .collect::<Vec<_>>();
        info!(
            ns = %service.namespace,
            name = %service.name,
            r#type = %service.r#type,
            ports = service.ports.len(),
            endpoints = ?ips,
            "Service"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::IpSet;
    use std::sync::{Arc as StdArc, Mutex};

    fn set_op(set: Set, path: &str, bytes: Vec<u8>) -> OpItem {
        OpItem::set(set, path.to_string(), bytes)
    }

    fn svc(name: &str) -> Vec<u8> {
        Service {
            namespace: "ns".to_string(),
            name: name.to_string(),
            ..Default::default()
        }
        .encode_to_vec()
    }

    fn ep(ip: &str) -> Vec<u8> {
        Endpoint {
            ips: Some(IpSet::from_iter([ip])),
            ..Default::default()
        }
        .encode_to_vec()
    }

    #[tokio::test]
    async fn groups_endpoints_by_service() {
        let seen = StdArc::new(Mutex::new(Vec::new()));
        let mut sink = FullState::new("node-a", {
            let seen = seen.clone();
            move |state: &[ServiceEndpoints]| {
                let summary = state
                    .iter()
                    .map(|s| (s.service.name.clone(), s.endpoints.len()))
                    .collect::<Vec<_>>();
                seen.lock().unwrap().push(summary);
            }
        });
        assert_eq!(sink.wait_request().await.unwrap(), "node-a");

        for op in [
            OpItem::reset(),
            set_op(Set::ServicesSet, "ns/svc", svc("svc")),
            set_op(Set::ServicesSet, "ns/svc-2", svc("svc-2")),
            set_op(Set::EndpointsSet, "ns/svc/pod-1", ep("10.0.0.1")),
            set_op(Set::EndpointsSet, "ns/svc/pod-2", ep("10.0.0.2")),
            set_op(Set::EndpointsSet, "ns/svc-2/ab12", ep("10.0.0.3")),
            // Unknown sets and invalid values are skipped.
            set_op(Set::GlobalNodeInfos, "|node-a||", vec![]),
            set_op(Set::EndpointsSet, "ns/svc/bad", vec![0xff, 0xff]),
            OpItem::sync(),
            OpItem::delete(Set::EndpointsSet, "ns/svc/pod-1".to_string()),
            OpItem::sync(),
        ] {
            sink.send(op).await.unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                vec![("svc".to_string(), 2), ("svc-2".to_string(), 1)],
                vec![("svc".to_string(), 1), ("svc-2".to_string(), 1)],
            ]
        );
    }

    #[tokio::test]
    async fn reset_discards_state() {
        let mut last = None;
        {
            let mut sink = FullState::new("node-a", |state: &[ServiceEndpoints]| {
                last = Some(state.len())
            });
            sink.send(set_op(Set::ServicesSet, "ns/svc", svc("svc")))
                .await
                .unwrap();
            sink.send(OpItem::reset()).await.unwrap();
            sink.send(OpItem::sync()).await.unwrap();
        }
        assert_eq!(last, Some(0));
    }
}
