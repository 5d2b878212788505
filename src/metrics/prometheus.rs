//! Prometheus metrics definitions and HTTP server

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default metrics port
pub const METRICS_PORT: u16 = 8080;

/// Pause after a failed accept, e.g. when out of file descriptors
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

lazy_static::lazy_static! {
    /// Total number of lookups by outcome
    pub static ref LOOKUPS: CounterVec = register_counter_vec!(
        "k8s_getsecret_lookups_total",
        "Total number of secret lookups",
        &["outcome"]
    ).unwrap();

    /// Lookup duration histogram
    pub static ref LOOKUP_DURATION: HistogramVec = register_histogram_vec!(
        "k8s_getsecret_lookup_duration_seconds",
        "Duration of secret lookups in seconds",
        &["outcome"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Service health (1 = healthy, 0 = unhealthy)
    pub static ref SERVICE_HEALTH: Gauge = register_gauge!(
        "k8s_getsecret_health",
        "Service health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Record one finished lookup
pub fn record_lookup(outcome: &str, seconds: f64) {
    LOOKUPS.with_label_values(&[outcome]).inc();
    LOOKUP_DURATION
        .with_label_values(&[outcome])
        .observe(seconds);
}

/// Bind the metrics listener on all interfaces
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);
    Ok(listener)
}

/// Serve metrics and probes until `shutdown` is cancelled
pub async fn serve(listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
    SERVICE_HEALTH.set(1.0);

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept metrics connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving metrics connection: {}", e);
            }
        });
    }

    SERVICE_HEALTH.set(0.0);
    info!("Metrics server stopped");
    Ok(())
}

/// Handle HTTP requests
async fn handle_request<B>(req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => text(StatusCode::OK, "ok"),
        "/readyz" | "/ready" => text(StatusCode::OK, "ok"),
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
