//! Messages exchanged by the watch APIs.

use std::fmt;

/// A logical set of values carried by a watch stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Set {
    ServicesSet = 0,
    EndpointsSet = 1,
    GlobalNodeInfos = 2,
    GlobalServiceInfos = 3,
    GlobalEndpointInfos = 4,
}

/// Identifies a value within a set.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Ref {
    #[prost(enumeration = "Set", tag = "1")]
    pub set: i32,
    #[prost(string, tag = "2")]
    pub path: String,
}

#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Value {
    #[prost(message, optional, tag = "1")]
    pub r#ref: Option<Ref>,
    #[prost(bytes = "vec", tag = "2")]
    pub bytes: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
pub struct EmptyOp {}

#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct OpItem {
    #[prost(oneof = "op_item::Op", tags = "1, 2, 3, 4")]
    pub op: Option<op_item::Op>,
}

pub mod op_item {
    #[derive(Clone, PartialEq, Eq, prost::Oneof)]
    pub enum Op {
        #[prost(message, tag = "1")]
        Set(super::Value),
        #[prost(message, tag = "2")]
        Delete(super::Ref),
        #[prost(message, tag = "3")]
        Sync(super::EmptyOp),
        #[prost(message, tag = "4")]
        Reset(super::EmptyOp),
    }
}

/// Requests the next diff of the per-node view.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct WatchReq {
    #[prost(string, tag = "1")]
    pub node_name: String,
}

/// Requests the next diff of the cluster-wide view.
#[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
pub struct GlobalWatchReq {}

// === impl Set ===

impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Set::ServicesSet => "ServicesSet",
            Set::EndpointsSet => "EndpointsSet",
            Set::GlobalNodeInfos => "GlobalNodeInfos",
            Set::GlobalServiceInfos => "GlobalServiceInfos",
            Set::GlobalEndpointInfos => "GlobalEndpointInfos",
        };
        name.fmt(f)
    }
}

// === impl OpItem ===

impl OpItem {
    pub fn set(set: Set, path: String, bytes: Vec<u8>) -> Self {
        Self {
            op: Some(op_item::Op::Set(Value {
                r#ref: Some(Ref::new(set, path)),
                bytes,
            })),
        }
    }

    pub fn delete(set: Set, path: String) -> Self {
        Self {
            op: Some(op_item::Op::Delete(Ref::new(set, path))),
        }
    }

    pub fn sync() -> Self {
        Self {
            op: Some(op_item::Op::Sync(EmptyOp {})),
        }
    }

    pub fn reset() -> Self {
        Self {
            op: Some(op_item::Op::Reset(EmptyOp {})),
        }
    }
}

// === impl Ref ===

impl Ref {
    pub fn new(set: Set, path: String) -> Self {
        Self {
            set: set as i32,
            path,
        }
    }
}
