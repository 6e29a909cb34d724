#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod api;
pub mod diffstore;
pub mod endpoints;
mod error;
pub mod hash;
pub mod jobs;
pub mod localsink;
pub mod proxystore;
pub mod watchstate;

#[cfg(test)]
mod test_util;

pub use self::error::{BoxError, Error};
