use crate::{
    api::{Object, OpItem, Set},
    diffstore::{DiffStore, State},
    Error,
};
use tracing::debug;

/// Receives the ops of a watch stream.
#[async_trait::async_trait]
pub trait OpSink: Send {
    async fn send(&mut self, op: OpItem) -> Result<(), Error>;
}

/// The diff stores of one watch, one per set.
///
/// A set may be listed more than once to split its values across several stores.
///
/// Sends stop after the first failure; the error is kept until it is taken with
/// [`WatchState::take_error`].
#[derive(Debug)]
pub struct WatchState {
    sets: Vec<Set>,
    stores: Vec<DiffStore<Object>>,
    error: Option<Error>,
}

// === impl WatchState ===

impl WatchState {
    pub fn new(sets: Vec<Set>) -> Self {
        let stores = sets.iter().map(|_| DiffStore::new()).collect();
        Self {
            sets,
            stores,
            error: None,
        }
    }

    pub fn store_for(&mut self, set: Set) -> &mut DiffStore<Object> {
        self.store_for_n(set, 0)
    }

    /// Returns the `n`th store of `set`.
    ///
    /// # Panics
    ///
    /// If the watch has no such store.
    pub fn store_for_n(&mut self, set: Set, n: usize) -> &mut DiffStore<Object> {
        let idx = self.index_of(set, n);
        &mut self.stores[idx]
    }

    fn index_of(&self, set: Set, n: usize) -> usize {
        self.sets
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == set)
            .nth(n)
            .map(|(i, _)| i)
            .unwrap_or_else(|| panic!("watch has no store #{n} for {set}"))
    }

    /// Sends a `Set` op for each changed value of `set`. Returns the number of ops.
    pub async fn send_updates<S>(&mut self, sink: &mut S, set: Set) -> usize
    where
        S: OpSink + ?Sized,
    {
        self.send_updates_n(sink, set, 0).await
    }

    pub async fn send_updates_n<S>(&mut self, sink: &mut S, set: Set, n: usize) -> usize
    where
        S: OpSink + ?Sized,
    {
        let idx = self.index_of(set, n);
        let Self { stores, error, .. } = self;

        let mut count = 0;
        for (path, item) in stores[idx].updated() {
            let op = OpItem::set(set, path.to_string(), item.value.encode_to_vec());
            send(error, sink, op).await;
            count += 1;
        }
        count
    }

    /// Sends a `Delete` op for each deleted value of `set`. Returns the number of ops.
    pub async fn send_deletes<S>(&mut self, sink: &mut S, set: Set) -> usize
    where
        S: OpSink + ?Sized,
    {
        self.send_deletes_n(sink, set, 0).await
    }

    pub async fn send_deletes_n<S>(&mut self, sink: &mut S, set: Set, n: usize) -> usize
    where
        S: OpSink + ?Sized,
    {
        let idx = self.index_of(set, n);
        let Self { stores, error, .. } = self;

        let mut count = 0;
        for (path, _) in stores[idx].deleted() {
            send(error, sink, OpItem::delete(set, path.to_string())).await;
            count += 1;
        }
        count
    }

    pub async fn send_sync<S>(&mut self, sink: &mut S)
    where
        S: OpSink + ?Sized,
    {
        send(&mut self.error, sink, OpItem::sync()).await;
    }

    pub async fn send_reset<S>(&mut self, sink: &mut S)
    where
        S: OpSink + ?Sized,
    {
        send(&mut self.error, sink, OpItem::reset()).await;
    }

    /// Closes a round on every store.
    pub fn reset(&mut self, state: State) {
        for store in self.stores.iter_mut() {
            store.reset(state);
        }
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }
}

async fn send<S>(error: &mut Option<Error>, sink: &mut S, op: OpItem)
where
    S: OpSink + ?Sized,
{
    if error.is_some() {
        return;
    }
    if let Err(e) = sink.send(op).await {
        debug!(error = %e, "Watch send failed");
        *error = Some(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{op_item::Op, Service};
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        ops: Vec<OpItem>,
        fail_after: Option<usize>,
    }

    #[async_trait::async_trait]
    impl OpSink for Recorder {
        async fn send(&mut self, op: OpItem) -> Result<(), Error> {
            if self.fail_after.is_some_and(|n| self.ops.len() >= n) {
                return Err(Error::Closed);
            }
            self.ops.push(op);
            Ok(())
        }
    }

    fn svc(name: &str) -> Object {
        Object::Service(Arc::new(Service {
            namespace: "ns".to_string(),
            name: name.to_string(),
            ..Default::default()
        }))
    }

    fn paths(ops: &[OpItem]) -> Vec<String> {
        ops.iter()
            .map(|op| match op.op.as_ref() {
                Some(Op::Set(v)) => {
                    let path = v.r#ref.as_ref().map_or("", |r| r.path.as_str());
                    format!("set {path}")
                }
                Some(Op::Delete(r)) => format!("del {}", r.path),
                Some(Op::Sync(_)) => "sync".to_string(),
                Some(Op::Reset(_)) => "reset".to_string(),
                None => "none".to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn sends_updates_then_deletes() {
        let mut sink = Recorder::default();
        let mut w = WatchState::new(vec![Set::ServicesSet]);

        w.store_for(Set::ServicesSet).set("ns/a", 1, svc("a"));
        w.store_for(Set::ServicesSet).set("ns/b", 2, svc("b"));
        w.send_reset(&mut sink).await;
        assert_eq!(w.send_updates(&mut sink, Set::ServicesSet).await, 2);
        assert_eq!(w.send_deletes(&mut sink, Set::ServicesSet).await, 0);
        w.send_sync(&mut sink).await;
        w.reset(State::Deleted);

        w.store_for(Set::ServicesSet).set("ns/b", 2, svc("b"));
        assert_eq!(w.send_updates(&mut sink, Set::ServicesSet).await, 0);
        assert_eq!(w.send_deletes(&mut sink, Set::ServicesSet).await, 1);
        w.send_sync(&mut sink).await;

        assert_eq!(
            paths(&sink.ops),
            vec!["reset", "set ns/a", "set ns/b", "sync", "del ns/a", "sync"]
        );
        assert!(w.error().is_none());
    }

    #[tokio::test]
    async fn repeated_sets_have_distinct_stores() {
        let mut sink = Recorder::default();
        let mut w = WatchState::new(vec![Set::EndpointsSet, Set::EndpointsSet]);
        w.store_for_n(Set::EndpointsSet, 1).set("ns/a/ff", 1, svc("a"));

        assert_eq!(w.send_updates_n(&mut sink, Set::EndpointsSet, 0).await, 0);
        assert_eq!(w.send_updates_n(&mut sink, Set::EndpointsSet, 1).await, 1);
    }

    #[tokio::test]
    async fn first_error_is_latched() {
        let mut sink = Recorder {
            fail_after: Some(1),
            ..Default::default()
        };
        let mut w = WatchState::new(vec![Set::ServicesSet]);
        w.store_for(Set::ServicesSet).set("ns/a", 1, svc("a"));
        w.store_for(Set::ServicesSet).set("ns/b", 2, svc("b"));

        w.send_reset(&mut sink).await;
        w.send_updates(&mut sink, Set::ServicesSet).await;
        w.send_sync(&mut sink).await;

        assert_eq!(paths(&sink.ops), vec!["reset"]);
        assert!(matches!(w.take_error(), Some(Error::Closed)));
        assert!(w.error().is_none());
    }

    #[test]
    #[should_panic]
    fn unknown_store_panics() {
        let mut w = WatchState::new(vec![Set::ServicesSet]);
        w.store_for(Set::EndpointsSet);
    }
}
