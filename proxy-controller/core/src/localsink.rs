//! Backends consuming the per-node diff stream in-process.

use crate::{watchstate::OpSink, Error};

pub mod filterreset;
pub mod fullstate;

/// A local backend.
///
/// Ops are delivered through [`OpSink::send`]; a `Sync` op marks the end of a consistent batch.
#[async_trait::async_trait]
pub trait LocalSink: OpSink {
    /// Prepares the backend before the first request.
    fn setup(&mut self) {}

    /// Waits until the backend wants the next diff, returning the node it serves.
    async fn wait_request(&mut self) -> Result<String, Error>;

    /// Discards any state received so far, e.g. after reconnecting to a remote feed.
    fn reset(&mut self) {}
}
