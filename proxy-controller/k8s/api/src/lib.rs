#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;

pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Node, NodeSpec,
            ObjectReference, Service, ServicePort, ServiceSpec, SessionAffinityConfig,
        },
        discovery::v1::{Endpoint, EndpointConditions, EndpointSlice},
    },
    apimachinery::pkg::util::intstr::IntOrString,
};
pub use kube::api::{ObjectMeta, ResourceExt};
