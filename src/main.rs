//! Kubernetes Secret lookup service
//!
//! Main entry point. Loads the resolver configuration, starts the lookup
//! endpoint and the metrics server, and stops both on shutdown signals.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use k8s_getsecret::config::ResolverConfig;
use k8s_getsecret::metrics::{self, METRICS_PORT};
use k8s_getsecret::resolver::KubeResolver;
use k8s_getsecret::server::{self, AppState, SERVER_PORT};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting k8s-getsecret");

    let config = ResolverConfig::from_env()?;
    info!(
        mode = ?config.mode,
        kubeconfig = %config.kubeconfig_path.display(),
        timeout = ?config.request_timeout,
        "Loaded resolver configuration"
    );

    let state = AppState::new(KubeResolver::new(config.clone()), config.request_timeout);

    // Bind both listeners up front so a taken port fails startup
    let listener = server::bind(SERVER_PORT).await?;
    let metrics_listener = metrics::bind(METRICS_PORT).await?;

    let shutdown = CancellationToken::new();

    let metrics_handle = tokio::spawn(metrics::serve(metrics_listener, shutdown.clone()));
    let server_handle = tokio::spawn(server::serve(listener, state, shutdown.clone()));

    let result = server::supervise(server_handle, metrics_handle, shutdown_signal()).await;
    shutdown.cancel();

    match &result {
        Ok(()) => info!("k8s-getsecret stopped"),
        Err(e) => error!("k8s-getsecret stopped: {:#}", e),
    }
    result
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,k8s_getsecret=debug,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
