//! Kubernetes Secret lookup service
//!
//! Serves the value of a single Secret key over HTTP. Each request resolves
//! its own connection to the cluster, reads the Secret and returns the key as
//! JSON.

pub mod config;
pub mod error;
pub mod metrics;
pub mod resolver;
pub mod secrets;
pub mod server;

pub use error::{Error, Result};
