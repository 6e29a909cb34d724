//! Mark-and-sweep change detection over full-state snapshots.
//!
//! A `DiffStore` is fed the complete current state on every round. Entries that were not set
//! since the last `reset(State::Deleted)` are reported as deleted, entries that are new or whose
//! hash differs are reported as changed.

use crate::hash::hash_of;
use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Deleted,
    Changed,
    Unchanged,
}

#[derive(Clone, Debug)]
pub struct Item<V> {
    pub hash: u64,
    pub value: V,
    state: State,
}

#[derive(Clone, Debug)]
pub struct DiffStore<V> {
    items: BTreeMap<String, Item<V>>,
}

// === impl DiffStore ===

impl<V> Default for DiffStore<V> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }
}

impl<V> DiffStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts a value.
    ///
    /// A new key or a different hash marks the entry changed. Setting the same hash again
    /// confirms the entry: it is no longer considered deleted, and a pending change is kept.
    pub fn set(&mut self, key: impl Into<String>, hash: u64, value: V) {
        use std::collections::btree_map::Entry;

        match self.items.entry(key.into()) {
            Entry::Vacant(e) => {
                e.insert(Item {
                    hash,
                    value,
                    state: State::Changed,
                });
            }
            Entry::Occupied(mut e) => {
                let item = e.get_mut();
                if item.hash != hash {
                    item.hash = hash;
                    item.value = value;
                    item.state = State::Changed;
                } else if item.state == State::Deleted {
                    item.state = State::Unchanged;
                }
            }
        }
    }

    /// Upserts a value, comparing it to the stored one with `eq`.
    ///
    /// The stored hash acts as a version and is bumped whenever `eq` reports a difference.
    /// `eq` sees `None` for an absent value, so callers decide how absent values compare.
    pub fn set_eq<F>(&mut self, key: impl Into<String>, value: V, eq: F)
    where
        F: Fn(Option<&V>, Option<&V>) -> bool,
    {
        let key = key.into();
        let (prev, version) = match self.items.get(&key) {
            Some(item) => (Some(&item.value), item.hash),
            None => (None, 0),
        };
        let version = if eq(prev, Some(&value)) {
            version
        } else {
            version.wrapping_add(1)
        };
        self.set(key, version, value);
    }

    /// Marks an entry deleted.
    pub fn delete(&mut self, key: &str) {
        if let Some(item) = self.items.get_mut(key) {
            item.state = State::Deleted;
        }
    }

    /// Marks every entry under `prefix` deleted.
    pub fn delete_by_prefix(&mut self, prefix: &str) {
        for (_, item) in self
            .items
            .range_mut(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            item.state = State::Deleted;
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.items
            .get(key)
            .filter(|i| i.state != State::Deleted)
            .map(|i| &i.value)
    }

    /// Lists the live entries under `prefix`, in key order.
    pub fn get_by_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a V)> {
        self.items
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .filter(|(_, i)| i.state != State::Deleted)
            .map(|(k, i)| (k.as_str(), &i.value))
    }

    /// Closes a round: evicts entries marked deleted and marks the survivors with `state`.
    pub fn reset(&mut self, state: State) {
        self.items.retain(|_, i| i.state != State::Deleted);
        for item in self.items.values_mut() {
            item.state = state;
        }
    }

    /// Changed entries, in ascending key order.
    pub fn updated(&self) -> impl Iterator<Item = (&str, &Item<V>)> {
        self.items
            .iter()
            .filter(|(_, i)| i.state == State::Changed)
            .map(|(k, i)| (k.as_str(), i))
    }

    /// Deleted entries, in descending key order.
    pub fn deleted(&self) -> impl Iterator<Item = (&str, &Item<V>)> {
        self.items
            .iter()
            .rev()
            .filter(|(_, i)| i.state == State::Deleted)
            .map(|(k, i)| (k.as_str(), i))
    }

    pub fn has_changes(&self) -> bool {
        self.items.values().any(|i| i.state != State::Unchanged)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<V: prost::Message> DiffStore<V> {
    /// Upserts a message, hashing its encoding.
    pub fn set_message(&mut self, key: impl Into<String>, value: V) {
        let hash = hash_of(&value);
        self.set(key, hash, value);
    }
}

// === impl Item ===

impl<V> Item<V> {
    pub fn state(&self) -> State {
        self.state
    }
}
