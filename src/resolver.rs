//! Kubernetes connection resolution
//!
//! Every lookup resolves a fresh client: the in-cluster service account when
//! available, the local kubeconfig otherwise.

use std::path::Path;

use futures::future::BoxFuture;
use futures::FutureExt;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::config::{ConnectionMode, ResolverConfig};
use crate::{Error, Result};

/// Produces a client able to read Secrets
pub trait Resolve: Send + Sync {
    fn resolve(&self) -> BoxFuture<'_, Result<Client>>;
}

/// Resolver backed by the in-cluster environment and the local kubeconfig
#[derive(Debug, Clone)]
pub struct KubeResolver {
    config: ResolverConfig,
}

impl KubeResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Load the connection configuration for the configured mode
    pub async fn load_config(&self) -> Result<Config> {
        match self.config.mode {
            ConnectionMode::InCluster => in_cluster_config(),
            ConnectionMode::Kubeconfig => kubeconfig_config(&self.config.kubeconfig_path).await,
            ConnectionMode::Auto => match in_cluster_config() {
                Ok(config) => Ok(config),
                Err(in_cluster) => {
                    debug!(
                        "In-cluster configuration unavailable, trying kubeconfig: {}",
                        in_cluster
                    );
                    kubeconfig_config(&self.config.kubeconfig_path).await
                }
            },
        }
    }
}

impl Resolve for KubeResolver {
    fn resolve(&self) -> BoxFuture<'_, Result<Client>> {
        async move {
            let config = self.load_config().await?;
            Client::try_from(config).map_err(|e| Error::ClientBuild(e.to_string()))
        }
        .boxed()
    }
}

fn in_cluster_config() -> Result<Config> {
    Config::incluster().map_err(|e| {
        Error::ConnectionUnavailable(format!("failed to load in-cluster config: {}", e))
    })
}

async fn kubeconfig_config(path: &Path) -> Result<Config> {
    let unavailable = |e: kube::config::KubeconfigError| {
        Error::ConnectionUnavailable(format!(
            "failed to build config from kubeconfig {}: {}",
            path.display(),
            e
        ))
    };

    let kubeconfig = Kubeconfig::read_from(path).map_err(unavailable)?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(unavailable)
}
