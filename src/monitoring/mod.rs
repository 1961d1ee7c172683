#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Observability surface: per-component metrics and the `/metrics` +
//! `/healthz` HTTP server.

pub mod metrics;
pub mod server;
