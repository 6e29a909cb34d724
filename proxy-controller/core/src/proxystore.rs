//! The revision-counted store of correlated cluster state.
//!
//! All state lives in one ordered tree keyed by `(Set, Namespace, Name, Source, Key)`. Writers
//! mutate it through [`Store::update`]; every update that changes at least one record bumps the
//! revision and wakes readers blocked in [`Store::view`].
//!
//! Endpoints are indexed twice: under their service (`Name` set) and under their source only
//! (`Name` empty). The by-source index lets a source be reconciled without knowing which service
//! it previously pointed to.

use crate::{
    api::{self, EndpointInfo, Node, NodeInfo, Object, Service, ServiceInfo},
    hash::{hash_of, key_of},
};
use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use std::{collections::BTreeMap, fmt, ops::Deref, sync::Arc};
use tokio::sync::watch;
use tracing::trace;

pub mod metrics;


/// The sets of records held by the store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Set {
    Nodes,
    Services,
    Endpoints,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub set: Set,
    pub namespace: String,
    pub name: String,
    pub source: String,
    pub key: String,
}

/// A stored record, tagged by the set it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Service(Arc<ServiceInfo>),
    Endpoint(Arc<EndpointInfo>),
    Node(Arc<NodeInfo>),
}

#[derive(Debug)]
pub struct Store {
    tree: RwLock<Tree>,
    state: watch::Sender<Revision>,
}

#[derive(Debug, Default)]
pub struct Tree {
    items: BTreeMap<Key, Value>,
    synced: AHashSet<Set>,
    rev: u64,
}

/// A write transaction.
///
/// Dereferences to the [`Tree`] for reads.
pub struct Tx<'t> {
    tree: &'t mut Tree,
    changes: usize,
}

#[derive(Copy, Clone, Debug, Default)]
struct Revision {
    rev: u64,
    closed: bool,
}

const PATH_SEP: &str = "|";

// === impl Set ===

impl Set {
    pub const ALL: [Set; 3] = [Set::Nodes, Set::Services, Set::Endpoints];

    /// The global watch set carrying this store set.
    pub fn global(&self) -> api::Set {
        match self {
            Set::Nodes => api::Set::GlobalNodeInfos,
            Set::Services => api::Set::GlobalServiceInfos,
            Set::Endpoints => api::Set::GlobalEndpointInfos,
        }
    }

    pub fn from_global(set: api::Set) -> Option<Self> {
        match set {
            api::Set::GlobalNodeInfos => Some(Set::Nodes),
            api::Set::GlobalServiceInfos => Some(Set::Services),
            api::Set::GlobalEndpointInfos => Some(Set::Endpoints),
            api::Set::ServicesSet | api::Set::EndpointsSet => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Set::Nodes => "nodes",
            Set::Services => "services",
            Set::Endpoints => "endpoints",
        }
    }
}

impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl Key ===

impl Key {
    pub fn new(set: Set, namespace: &str, name: &str, source: &str, key: &str) -> Self {
        Self {
            set,
            namespace: namespace.to_string(),
            name: name.to_string(),
            source: source.to_string(),
            key: key.to_string(),
        }
    }

    fn service(namespace: &str, name: &str) -> Self {
        Self::new(Set::Services, namespace, name, "", "")
    }

    fn node(name: &str) -> Self {
        Self::new(Set::Nodes, "", name, "", "")
    }

    fn endpoint(ei: &EndpointInfo, by_service: bool) -> Self {
        let name = if by_service {
            ei.service_name.as_str()
        } else {
            ""
        };
        Self::new(
            Set::Endpoints,
            &ei.namespace,
            name,
            &ei.source_name,
            &key_of(ei.hash),
        )
    }

    /// Joins the identity fields with `|`.
    pub fn path(&self) -> String {
        [
            self.namespace.as_str(),
            self.name.as_str(),
            self.source.as_str(),
            self.key.as_str(),
        ]
        .join(PATH_SEP)
    }

    /// Parses a path produced by [`Key::path`]; `None` unless it has exactly four segments.
    pub fn from_path(set: Set, path: &str) -> Option<Self> {
        let mut parts = path.split(PATH_SEP);
        let namespace = parts.next()?;
        let name = parts.next()?;
        let source = parts.next()?;
        let key = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(set, namespace, name, source, key))
    }
}

// === impl Value ===

impl Value {
    pub fn set(&self) -> Set {
        match self {
            Value::Service(_) => Set::Services,
            Value::Endpoint(_) => Set::Endpoints,
            Value::Node(_) => Set::Nodes,
        }
    }

    pub fn hash(&self) -> u64 {
        match self {
            Value::Service(si) => si.hash,
            Value::Endpoint(ei) => ei.hash,
            Value::Node(ni) => ni.hash,
        }
    }

    pub fn as_service(&self) -> Option<&Arc<ServiceInfo>> {
        match self {
            Value::Service(si) => Some(si),
            _ => None,
        }
    }

    pub fn as_endpoint(&self) -> Option<&Arc<EndpointInfo>> {
        match self {
            Value::Endpoint(ei) => Some(ei),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Arc<NodeInfo>> {
        match self {
            Value::Node(ni) => Some(ni),
            _ => None,
        }
    }

    /// Decodes a value of the given set, as served by the global API.
    pub fn decode(set: Set, bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        use prost::Message;

        Ok(match set {
            Set::Services => Value::Service(Arc::new(ServiceInfo::decode(bytes)?)),
            Set::Endpoints => Value::Endpoint(Arc::new(EndpointInfo::decode(bytes)?)),
            Set::Nodes => Value::Node(Arc::new(NodeInfo::decode(bytes)?)),
        })
    }
}

impl From<Value> for Object {
    fn from(value: Value) -> Self {
        match value {
            Value::Service(si) => Object::ServiceInfo(si),
            Value::Endpoint(ei) => Object::EndpointInfo(ei),
            Value::Node(ni) => Object::NodeInfo(ni),
        }
    }
}

// === impl Store ===

impl Default for Store {
    fn default() -> Self {
        Self {
            tree: RwLock::new(Tree::default()),
            state: watch::Sender::new(Revision::default()),
        }
    }
}

impl Store {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs a write transaction.
    ///
    /// The revision is bumped once if `f` changed anything, and readers are woken after the
    /// tree lock is released.
    pub fn update<T>(&self, f: impl FnOnce(&mut Tx<'_>) -> T) -> T {
        let mut tree = self.tree.write();
        let mut tx = Tx {
            tree: &mut *tree,
            changes: 0,
        };
        let out = f(&mut tx);
        let changes = tx.changes;
        if changes == 0 {
            return out;
        }

        tree.rev += 1;
        let rev = tree.rev;
        drop(tree);

        trace!(rev, changes, "Updated store");
        self.state.send_modify(|s| s.rev = s.rev.max(rev));
        out
    }

    /// Waits for a revision newer than `after`, then runs `f` against a snapshot of the tree.
    ///
    /// Returns the revision that `f` observed. If the store is closed, `f` is not called and
    /// `(0, true)` is returned.
    pub async fn view<F>(&self, after: u64, f: F) -> (u64, bool)
    where
        F: FnOnce(&Tree),
    {
        let mut rx = self.state.subscribe();
        let closed = match rx.wait_for(|s| s.rev > after || s.closed).await {
            Ok(state) => state.closed,
            Err(_) => true,
        };
        if closed {
            return (0, true);
        }

        let tree = self.tree.read();
        f(&tree);
        (tree.rev, false)
    }

    /// Permanently wakes all readers.
    pub fn close(&self) {
        self.state.send_modify(|s| s.closed = true);
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn rev(&self) -> u64 {
        self.tree.read().rev
    }

    /// Runs `f` against the current tree without waiting.
    pub fn read<T>(&self, f: impl FnOnce(&Tree) -> T) -> T {
        f(&self.tree.read())
    }
}

// === impl Tree ===

impl Tree {
    pub fn rev(&self) -> u64 {
        self.rev
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates over the records of a set, in key order.
    pub fn each(&self, set: Set) -> impl Iterator<Item = (&Key, &Value)> + '_ {
        self.items
            .range(Key::new(set, "", "", "", "")..)
            .take_while(move |(k, _)| k.set == set)
    }

    pub fn count(&self, set: Set) -> usize {
        self.each(set).count()
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.items.get(key)
    }

    pub fn is_synced(&self, set: Set) -> bool {
        self.synced.contains(&set)
    }

    /// Whether every set has been synced at least once.
    pub fn all_synced(&self) -> bool {
        Set::ALL.iter().all(|s| self.synced.contains(s))
    }

    pub fn get_service(&self, namespace: &str, name: &str) -> Option<&Arc<ServiceInfo>> {
        self.items
            .get(&Key::service(namespace, name))
            .and_then(Value::as_service)
    }

    /// Iterates over the endpoints of a service from all of its sources.
    pub fn each_endpoint_of_service<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Arc<EndpointInfo>> + 'a {
        self.items
            .range(Key::new(Set::Endpoints, namespace, name, "", "")..)
            .take_while(move |(k, _)| {
                k.set == Set::Endpoints && k.namespace == namespace && k.name == name
            })
            .filter_map(|(_, v)| v.as_endpoint())
    }

    fn each_endpoint_of_source<'a>(
        &'a self,
        namespace: &'a str,
        source: &'a str,
    ) -> impl Iterator<Item = (&'a Key, &'a Arc<EndpointInfo>)> + 'a {
        self.items
            .range(Key::new(Set::Endpoints, namespace, "", source, "")..)
            .take_while(move |(k, _)| {
                k.set == Set::Endpoints
                    && k.namespace == namespace
                    && k.name.is_empty()
                    && k.source == source
            })
            .filter_map(|(k, v)| Some((k, v.as_endpoint()?)))
    }

    pub fn get_node(&self, name: &str) -> Option<&Node> {
        self.items
            .get(&Key::node(name))
            .and_then(Value::as_node)
            .and_then(|ni| ni.node.as_ref())
    }
}

// === impl Tx ===

impl Deref for Tx<'_> {
    type Target = Tree;

    fn deref(&self) -> &Tree {
        self.tree
    }
}

impl Tx<'_> {
    /// The number of effective mutations so far.
    pub fn changes(&self) -> usize {
        self.changes
    }

    fn set(&mut self, key: Key, value: Value) {
        if let Some(prev) = self.tree.items.get(&key) {
            if prev.hash() == value.hash() {
                return;
            }
        }
        self.tree.items.insert(key, value);
        self.changes += 1;
    }

    fn del(&mut self, key: &Key) {
        if self.tree.items.remove(key).is_some() {
            self.changes += 1;
        }
    }

    /// Clears all records and sync marks.
    pub fn reset(&mut self) {
        if !self.tree.items.is_empty() {
            self.changes += self.tree.items.len();
            self.tree.items.clear();
        }
        if !self.tree.synced.is_empty() {
            self.tree.synced.clear();
            self.changes += 1;
        }
    }

    /// Stores a record under an explicit key, as received from a remote store.
    pub fn set_raw(&mut self, key: Key, value: Value) {
        assert_eq!(key.set, value.set(), "record stored in the wrong set");
        self.set(key, value);
    }

    pub fn del_raw(&mut self, key: &Key) {
        self.del(key);
    }

    /// Marks a set as synced. Only the first mark counts as a change.
    pub fn set_sync(&mut self, set: Set) {
        if self.tree.synced.insert(set) {
            self.changes += 1;
        }
    }

    pub fn set_service(&mut self, service: Service, topology_keys: Vec<String>) {
        let key = Key::service(&service.namespace, &service.name);
        let mut info = ServiceInfo {
            service: Some(service),
            topology_keys,
            hash: 0,
        };
        info.hash = hash_of(&info);
        self.set(key, Value::Service(Arc::new(info)));
    }

    pub fn del_service(&mut self, namespace: &str, name: &str) {
        self.del(&Key::service(namespace, name));
    }

    /// Replaces every endpoint produced by a source.
    ///
    /// Stored endpoints of the source that are absent from `endpoints` are deleted from both
    /// indexes. Reapplying the same endpoints changes nothing.
    ///
    /// # Panics
    ///
    /// If an endpoint's namespace or source does not match `namespace` and `source`.
    pub fn set_endpoints_of_source(
        &mut self,
        namespace: &str,
        source: &str,
        mut endpoints: Vec<EndpointInfo>,
    ) {
        for ei in endpoints.iter_mut() {
            assert_eq!(
                ei.namespace, namespace,
                "endpoint namespace does not match its source"
            );
            assert_eq!(ei.source_name, source, "endpoint has a different source");
            ei.hash = hash_of(&ei.content());
        }

        let seen = endpoints
            .iter()
            .map(|ei| (ei.hash, ei.service_name.as_str()))
            .collect::<AHashMap<_, _>>();
        let stale = self
            .tree
            .each_endpoint_of_source(namespace, source)
            .filter(|(_, ei)| seen.get(&ei.hash) != Some(&ei.service_name.as_str()))
            .map(|(k, ei)| (k.clone(), ei.service_name.clone()))
            .collect::<Vec<_>>();
        for (key, service_name) in stale {
            self.del(&key);
            self.del(&Key {
                name: service_name,
                ..key
            });
        }

        for ei in endpoints {
            let by_service = Key::endpoint(&ei, true);
            let by_source = Key::endpoint(&ei, false);
            let ei = Arc::new(ei);
            self.set(by_service, Value::Endpoint(ei.clone()));
            self.set(by_source, Value::Endpoint(ei));
        }
    }

    pub fn del_endpoints_of_source(&mut self, namespace: &str, source: &str) {
        let keys = self
            .tree
            .each_endpoint_of_source(namespace, source)
            .map(|(k, ei)| (k.clone(), ei.service_name.clone()))
            .collect::<Vec<_>>();
        for (key, service_name) in keys {
            self.del(&key);
            self.del(&Key {
                name: service_name,
                ..key
            });
        }
    }

    /// Stores a modified copy of a stored endpoint, rekeying it if its content changed.
    ///
    /// `ei.hash` must still hold the hash of the stored record.
    pub fn set_endpoint(&mut self, mut ei: EndpointInfo) {
        let hash = hash_of(&ei.content());
        if hash == ei.hash {
            return;
        }

        self.del(&Key::endpoint(&ei, true));
        self.del(&Key::endpoint(&ei, false));

        ei.hash = hash;
        let by_service = Key::endpoint(&ei, true);
        let by_source = Key::endpoint(&ei, false);
        let ei = Arc::new(ei);
        self.set(by_service, Value::Endpoint(ei.clone()));
        self.set(by_source, Value::Endpoint(ei));
    }

    pub fn set_node(&mut self, node: Node) {
        let key = Key::node(&node.name);
        let hash = hash_of(&node);
        self.set(
            key,
            Value::Node(Arc::new(NodeInfo {
                node: Some(node),
                hash,
            })),
        );
    }

    pub fn del_node(&mut self, name: &str) {
        self.del(&Key::node(name));
    }
}
