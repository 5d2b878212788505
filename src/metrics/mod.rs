//! Prometheus metrics for the secret lookup service
//!
//! Lookup counters and latencies, served together with health probes on a
//! port separate from the lookup endpoint.

pub mod prometheus;

pub use self::prometheus::*;
