//! A local sink wrapper hiding reconnections from the backend.
//!
//! A new watch starts from scratch, so after a reset the whole state is sent again. The wrapper
//! remembers what the backend holds: resent values that did not change are dropped, and values
//! that were not resent are deleted when the batch ends.

use super::LocalSink;
use crate::{
    api::{op_item::Op, OpItem, Ref, Set, Value},
    hash::hash_bytes,
    watchstate::OpSink,
    Error,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use tracing::debug;

/// A value's set and path.
type Path = (i32, String);

pub struct FilterReset<S> {
    sink: S,
    filtering: bool,
    memory: HashMap<Path, u64>,
    seen: HashSet<Path>,
}

// === impl FilterReset ===

impl<S: LocalSink> FilterReset<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            filtering: false,
            memory: HashMap::default(),
            seen: HashSet::default(),
        }
    }

    fn start_filtering(&mut self) {
        self.filtering = true;
        self.seen.clear();
    }

    /// Deletes the remembered values that were not resent since the reset.
    async fn delete_unseen(&mut self) -> Result<(), Error> {
        let mut unseen = self
            .memory
            .keys()
            .filter(|path| !self.seen.contains(*path))
            .cloned()
            .collect::<Vec<_>>();
        // Endpoints go before their services.
        unseen.sort_by_key(|(set, path)| (*set != Set::EndpointsSet as i32, path.clone()));
        if !unseen.is_empty() {
            debug!(values = unseen.len(), "Deleting values missing after reset");
        }

        for (set, path) in unseen {
            self.memory.remove(&(set, path.clone()));
            self.sink
                .send(OpItem {
                    op: Some(Op::Delete(Ref { set, path })),
                })
                .await?;
        }

        self.filtering = false;
        self.seen.clear();
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: LocalSink> OpSink for FilterReset<S> {
    async fn send(&mut self, op: OpItem) -> Result<(), Error> {
        match &op.op {
            Some(Op::Set(Value {
                r#ref: Some(r),
                bytes,
            })) => {
                let path = (r.set, r.path.clone());
                if self.filtering {
                    self.seen.insert(path.clone());
                }
                let hash = hash_bytes(bytes);
                if self.memory.insert(path, hash) == Some(hash) {
                    return Ok(());
                }
            }
            Some(Op::Delete(r)) => {
                if self.memory.remove(&(r.set, r.path.clone())).is_none() {
                    return Ok(());
                }
            }
            Some(Op::Reset(_)) => {
                self.start_filtering();
                return Ok(());
            }
            Some(Op::Sync(_)) if self.filtering => self.delete_unseen().await?,
            _ => {}
        }
        self.sink.send(op).await
    }
}

#[async_trait::async_trait]
impl<S: LocalSink> LocalSink for FilterReset<S> {
    fn setup(&mut self) {
        self.sink.setup();
    }

    async fn wait_request(&mut self) -> Result<String, Error> {
        self.sink.wait_request().await
    }

    fn reset(&mut self) {
        self.start_filtering();
    }
}
