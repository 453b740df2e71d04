//! Outbound side of the proxy.
//!
//! [`UpstreamClient`] forwards cache misses to the computation server over
//! the shared wire protocol, bounded by the configured request timeout.

mod client;

pub use client::{Evaluator, UpstreamClient};
