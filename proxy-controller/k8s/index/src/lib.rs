//! Projects Kubernetes objects into the proxy store.
//!
//! Each watched kind has its own index, driven by a kubert watch:
//!
//! - `Service`s become the normalized service values of the store. Only the services handled by
//!   this proxy are watched (see [`Config::service_selector`]).
//! - `EndpointSlice`s (or legacy `Endpoints`) become endpoint records. Every event replaces all
//!   records of the source object; the store reconciles them.
//! - `Node`s are stored with glob-filtered labels and annotations. Their labels provide the
//!   topology of legacy endpoints.
//!
//! An index marks its set synced in the store once its watch has listed all objects.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod endpoint_slice;
pub mod endpoints;
mod globs;
pub mod metrics;
pub mod node;
pub mod service;

#[cfg(test)]
mod tests;

pub use self::{
    endpoint_slice::SliceIndex,
    endpoints::EndpointsIndex,
    globs::Globs,
    metrics::{IndexMetrics, SizedIndex},
    node::NodeIndex,
    service::ServiceIndex,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use kpng_proxy_controller_k8s_api::labels;

/// Options of the Kubernetes projection.
#[derive(Clone, Debug)]
pub struct Config {
    /// Reads endpoints from `EndpointSlice`s instead of `Endpoints`.
    pub use_slices: bool,
    pub service_proxy_name: Option<String>,
    pub service_label_globs: Vec<String>,
    pub service_annotation_globs: Vec<String>,
    pub node_label_globs: Vec<String>,
    pub node_annotation_globs: Vec<String>,
}

/// Names of indexed objects, by namespace.
#[derive(Debug, Default)]
struct Names(HashMap<String, HashSet<String>>);

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            use_slices: true,
            service_proxy_name: None,
            service_label_globs: vec![],
            service_annotation_globs: vec![],
            node_label_globs: vec![
                labels::HOSTNAME.to_string(),
                labels::ZONE.to_string(),
                labels::REGION.to_string(),
            ],
            node_annotation_globs: vec![],
        }
    }
}

impl Config {
    /// The label selector of the watched services.
    pub fn service_selector(&self) -> String {
        labels::service_selector(self.service_proxy_name.as_deref())
    }
}

// === impl Names ===

impl Names {
    fn insert(&mut self, ns: String, name: String) {
        self.0.entry(ns).or_default().insert(name);
    }

    fn remove(&mut self, ns: &str, name: &str) {
        if let Some(names) = self.0.get_mut(ns) {
            names.remove(name);
            if names.is_empty() {
                self.0.remove(ns);
            }
        }
    }

    fn len(&self, ns: &str) -> usize {
        self.0.get(ns).map_or(0, |names| names.len())
    }
}
