//! Resolver configuration loaded once at startup

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Selects the connection mode
pub const MODE_ENV: &str = "GETSECRET_CONNECTION_MODE";
/// Overrides the kubeconfig location
pub const KUBECONFIG_ENV: &str = "GETSECRET_KUBECONFIG";
/// Deadline for a single lookup, in whole seconds
pub const TIMEOUT_ENV: &str = "GETSECRET_REQUEST_TIMEOUT_SECS";

/// Default lookup deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How the resolver reaches the Kubernetes API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// In-cluster service account first, then the local kubeconfig
    #[default]
    Auto,
    /// In-cluster service account only
    InCluster,
    /// Local kubeconfig only
    Kubeconfig,
}

impl FromStr for ConnectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(ConnectionMode::Auto),
            "in-cluster" | "incluster" => Ok(ConnectionMode::InCluster),
            "kubeconfig" => Ok(ConnectionMode::Kubeconfig),
            other => Err(Error::Config(format!(
                "{} must be one of auto, in-cluster, kubeconfig (got {:?})",
                MODE_ENV, other
            ))),
        }
    }
}

/// Explicit input to the connection resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub mode: ConnectionMode,
    /// Kubeconfig file consulted when the in-cluster configuration is not used
    pub kubeconfig_path: PathBuf,
    pub request_timeout: Duration,
}

impl ResolverConfig {
    /// Build the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match lookup(MODE_ENV) {
            Some(value) => value.parse()?,
            None => ConnectionMode::default(),
        };

        let kubeconfig_path = match lookup(KUBECONFIG_ENV).filter(|p| !p.is_empty()) {
            Some(path) => PathBuf::from(path),
            None => default_kubeconfig_path(&lookup),
        };

        let request_timeout = match lookup(TIMEOUT_ENV) {
            Some(value) => parse_timeout(&value)?,
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        Ok(Self {
            mode,
            kubeconfig_path,
            request_timeout,
        })
    }
}

/// `<home>/.kube/config`, with home taken from `HOME` or else `USERPROFILE`
pub fn default_kubeconfig_path<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    home_dir(lookup).join(".kube").join("config")
}

fn home_dir<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let home = lookup("HOME")
        .filter(|h| !h.is_empty())
        .or_else(|| lookup("USERPROFILE"))
        .unwrap_or_default();
    PathBuf::from(home)
}

fn parse_timeout(value: &str) -> Result<Duration> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(Error::Config(format!(
            "{} must be a positive number of seconds (got {:?})",
            TIMEOUT_ENV, value
        ))),
    }
}
