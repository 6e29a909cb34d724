use kpng_proxy_controller_k8s_api::ResourceExt;
use kubert::index::{ClusterRemoved, NamespacedRemoved};
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;

/// Wraps an index to count the events it handles.
pub struct IndexMetrics<T> {
    inner: T,

    index_size: Family<NamespacedIndexLabels, Gauge>,
    index_applies: Family<NamespacedIndexLabels, Counter>,
    index_deletes: Family<NamespacedIndexLabels, Counter>,
    index_resets: Family<IndexLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespacedIndexLabels {
    namespace: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: String,
}

/// The number of objects of kind `R` held by an index in a namespace.
///
/// Cluster-scoped indexes ignore the namespace.
pub trait SizedIndex<R> {
    fn size(&self, namespace: &str) -> usize;
}

impl<T, R> SizedIndex<R> for Arc<RwLock<T>>
where
    T: SizedIndex<R>,
{
    fn size(&self, namespace: &str) -> usize {
        self.read().size(namespace)
    }
}

// === impl IndexMetrics ===

impl<T> IndexMetrics<T> {
    pub fn register(inner: T, prom: &mut Registry) -> Self {
        let index_size = Family::default();
        prom.register(
            "index_size",
            "Gauge of the number of resources in the index",
            index_size.clone(),
        );

        let index_applies = Family::default();
        prom.register(
            "index_applies",
            "Count of applies to the index",
            index_applies.clone(),
        );

        let index_deletes = Family::default();
        prom.register(
            "index_deletes",
            "Count of deletes to the index",
            index_deletes.clone(),
        );

        let index_resets = Family::default();
        prom.register(
            "index_resets",
            "Count of resets to the index",
            index_resets.clone(),
        );

        Self {
            inner,
            index_size,
            index_applies,
            index_deletes,
            index_resets,
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    fn labels<R>(namespace: String) -> NamespacedIndexLabels
    where
        R: ResourceExt<DynamicType = ()>,
    {
        NamespacedIndexLabels {
            namespace,
            kind: R::kind(&()).to_string(),
        }
    }

    fn reset_labels<R>() -> IndexLabels
    where
        R: ResourceExt<DynamicType = ()>,
    {
        IndexLabels {
            kind: R::kind(&()).to_string(),
        }
    }
}

impl<T> IndexMetrics<Arc<RwLock<T>>> {
    fn update_size<R>(&self, namespace: String)
    where
        T: SizedIndex<R>,
        R: ResourceExt<DynamicType = ()>,
    {
        let size = SizedIndex::<R>::size(&self.inner, &namespace);
        self.index_size
            .get_or_create(&Self::labels::<R>(namespace))
            .set(size as i64);
    }
}

impl<R, T> kubert::index::IndexNamespacedResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R>,
    T: kubert::index::IndexNamespacedResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let namespace = resource.namespace().unwrap_or_default();
        self.index_applies
            .get_or_create(&Self::labels::<R>(namespace.clone()))
            .inc();
        self.inner.write().apply(resource);
        self.update_size::<R>(namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.index_deletes
            .get_or_create(&Self::labels::<R>(namespace.clone()))
            .inc();
        self.inner.write().delete(namespace.clone(), name);
        self.update_size::<R>(namespace);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        let namespaces = resources
            .iter()
            .flat_map(|r| r.namespace())
            .chain(removed.keys().cloned())
            .collect::<Vec<_>>();
        self.index_resets
            .get_or_create(&Self::reset_labels::<R>())
            .inc();
        self.inner.write().reset(resources, removed);
        for ns in namespaces {
            self.update_size::<R>(ns);
        }
    }
}

impl<R, T> kubert::index::IndexClusterResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R>,
    T: kubert::index::IndexClusterResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        self.index_applies
            .get_or_create(&Self::labels::<R>(String::new()))
            .inc();
        self.inner.write().apply(resource);
        self.update_size::<R>(String::new());
    }

    fn delete(&mut self, name: String) {
        self.index_deletes
            .get_or_create(&Self::labels::<R>(String::new()))
            .inc();
        self.inner.write().delete(name);
        self.update_size::<R>(String::new());
    }

    fn reset(&mut self, resources: Vec<R>, removed: ClusterRemoved) {
        self.index_resets
            .get_or_create(&Self::reset_labels::<R>())
            .inc();
        self.inner.write().reset(resources, removed);
        self.update_size::<R>(String::new());
    }
}
