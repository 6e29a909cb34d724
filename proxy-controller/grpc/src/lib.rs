#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The watch APIs of the controller.
//!
//! Both services stream diffs of the store: `kpng.v1.Endpoints` serves the view of one node and
//! `kpng.v1.Global` serves the whole store. Clients request each diff, and every diff is
//! terminated by a `Sync` op. Clients of both APIs live here too, so that one controller can
//! feed from another.

pub mod api2local;
pub mod api2store;
pub mod global;
pub mod local;
pub mod metrics;
mod watch;


/// Generated service stubs.
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/kpng.v1.Endpoints.rs"));
    include!(concat!(env!("OUT_DIR"), "/kpng.v1.Global.rs"));
}

pub use self::{global::GlobalServer, local::LocalServer, metrics::GrpcServerMetricsFamily};
