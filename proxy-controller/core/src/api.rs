pub mod global;
pub mod localnet;
pub mod watch;

pub use self::{
    global::{EndpointConditions, EndpointInfo, Node, NodeInfo, ServiceInfo},
    localnet::{
        ClientIpAffinity, Endpoint, IpFilter, IpSet, PortMapping, PortName, Protocol, Service,
        ServiceIps,
    },
    watch::{op_item, EmptyOp, GlobalWatchReq, OpItem, Ref, Set, Value, WatchReq},
};
use prost::Message;
use std::sync::Arc;

/// Any value carried by a `Set` op, tagged by its type.
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    Service(Arc<Service>),
    Endpoint(Arc<Endpoint>),
    ServiceInfo(Arc<ServiceInfo>),
    EndpointInfo(Arc<EndpointInfo>),
    NodeInfo(Arc<NodeInfo>),
}

// === impl Object ===

impl Object {
    pub fn encode_to_vec(&self) -> Vec<u8> {
        match self {
            Self::Service(v) => v.encode_to_vec(),
            Self::Endpoint(v) => v.encode_to_vec(),
            Self::ServiceInfo(v) => v.encode_to_vec(),
            Self::EndpointInfo(v) => v.encode_to_vec(),
            Self::NodeInfo(v) => v.encode_to_vec(),
        }
    }

    /// Decodes the value of an op in `set`.
    pub fn decode(set: Set, bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Ok(match set {
            Set::ServicesSet => Self::Service(Arc::new(Service::decode(bytes)?)),
            Set::EndpointsSet => Self::Endpoint(Arc::new(Endpoint::decode(bytes)?)),
            Set::GlobalServiceInfos => Self::ServiceInfo(Arc::new(ServiceInfo::decode(bytes)?)),
            Set::GlobalEndpointInfos => {
                Self::EndpointInfo(Arc::new(EndpointInfo::decode(bytes)?))
            }
            Set::GlobalNodeInfos => Self::NodeInfo(Arc::new(NodeInfo::decode(bytes)?)),
        })
    }
}
