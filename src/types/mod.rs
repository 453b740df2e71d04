//! Shared types: configuration, errors and the request/response model.

pub mod config;
pub mod errors;
pub mod requests;
pub mod responses;
