//! Hourglass - a caching DNS forwarder.
//!
//! Answers are kept as the upstream sent them and served with their TTLs
//! counted down in place. Expired answers are fetched again on demand.

pub mod answer;
pub mod cache;
pub mod clock;
pub mod error;
pub mod query;
pub mod resolver;
pub mod server;
pub mod stats;
pub mod upstream;
pub mod wire;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
