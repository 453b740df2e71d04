//! # calcache
//!
//! Caching proxy in front of an arithmetic computation server.
//!
//! Clients send expressions such as `(1+2)*4` to the proxy. The proxy
//! answers from its cache when the entry is fresh, otherwise forwards the
//! request to the computation server, which returns the value together
//! with a step-by-step explanation. When the server is slow or down, a
//! stale cached answer is served instead of an error.
//!
//! ## Modules
//!
//! - [`protocol`] - Newline-delimited JSON frames and the framed transport
//! - [`cache`] - Keyed response cache with freshness and single-flight
//! - [`proxy`] - Connection dispatcher and per-client sessions
//! - [`upstream`] - Client stub for the computation server
//! - [`engine`] - Expression parser, evaluator and computation server
//! - [`cli`] - Command-line interface
//! - [`types`] - Shared types

pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod engine;
pub mod protocol;
pub mod proxy;
pub mod types;
pub mod upstream;

pub use types::config::Config;
pub use types::errors::{CalcacheError, CalcacheResult};
