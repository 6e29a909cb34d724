//! Long-running jobs moving state in and out of the proxy store.

pub mod file2store;
pub mod store2diff;
pub mod store2file;
pub mod store2globaldiff;
pub mod store2localdiff;

mod state;

pub use self::state::{GlobalState, ServiceState};
