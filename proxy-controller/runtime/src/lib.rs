#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use kpng_proxy_controller_core as core;
pub use kpng_proxy_controller_grpc as grpc;
pub use kpng_proxy_controller_k8s_api as k8s;
pub use kpng_proxy_controller_k8s_index as index;

mod args;

pub use self::args::Args;
