//! Secret lookup HTTP endpoint
//!
//! Every path on the listener is served by the lookup handler. A request
//! carries `namespace`, `secretName` and `key` query parameters and gets back
//! `{"key": ..., "value": ...}` as JSON, or a plain-text error.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::resolver::Resolve;
use crate::secrets::{self, SecretValue};
use crate::{Error, Result};

/// Port the lookup endpoint listens on
pub const SERVER_PORT: u16 = 9090;

/// Parameters of one lookup request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupParams {
    pub namespace: String,
    pub secret_name: String,
    pub key: String,
}

impl LookupParams {
    /// Extract the parameters from a raw query string.
    ///
    /// The first occurrence of a repeated parameter wins. All three must be
    /// non-empty.
    pub fn from_query(query: Option<&str>) -> Result<Self> {
        let mut namespace = None;
        let mut secret_name = None;
        let mut key = None;

        for (name, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            let slot = match name.as_ref() {
                "namespace" => &mut namespace,
                "secretName" => &mut secret_name,
                "key" => &mut key,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }

        match (namespace, secret_name, key) {
            (Some(namespace), Some(secret_name), Some(key))
                if !namespace.is_empty() && !secret_name.is_empty() && !key.is_empty() =>
            {
                Ok(Self {
                    namespace,
                    secret_name,
                    key,
                })
            }
            _ => Err(Error::MissingParameter),
        }
    }
}

/// State shared by every request
pub struct AppState<R> {
    resolver: R,
    request_timeout: Duration,
}

impl<R: Resolve> AppState<R> {
    pub fn new(resolver: R, request_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            resolver,
            request_timeout,
        })
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Resolve a client and read one key, bounded by the request deadline.
    ///
    /// Dropping the returned future cancels the in-flight API call.
    pub async fn lookup(&self, params: &LookupParams) -> Result<SecretValue> {
        let fetch = async {
            let client = self.resolver.resolve().await?;
            secrets::lookup(&client, &params.namespace, &params.secret_name, &params.key).await
        };

        tokio::time::timeout(self.request_timeout, fetch)
            .await
            .map_err(|_| Error::Timeout(self.request_timeout))?
    }
}

/// Bind the lookup listener on all interfaces
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Starting server on {}", addr);
    Ok(listener)
}

/// Accept connections until `shutdown` is cancelled
pub async fn serve<R>(
    listener: TcpListener,
    state: Arc<AppState<R>>,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    R: Resolve + 'static,
{
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(metrics::ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(handle(&*state, req).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving connection from {}: {}", peer, e);
            }
        });
    }

    info!("Server stopped accepting connections");
    Ok(())
}

/// Run until `shutdown_signal` resolves or the lookup server exits.
///
/// A metrics server that stops is logged and the lookup server keeps
/// running. The lookup server exiting for any reason is an error.
pub async fn supervise<S>(
    mut server: JoinHandle<anyhow::Result<()>>,
    mut metrics: JoinHandle<anyhow::Result<()>>,
    shutdown_signal: S,
) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown_signal);
    let mut metrics_running = true;

    loop {
        tokio::select! {
            res = &mut server => {
                return match res {
                    Ok(Ok(())) => Err(anyhow::anyhow!("lookup server exited unexpectedly")),
                    Ok(Err(e)) => Err(e.context("lookup server failed")),
                    Err(e) => Err(anyhow::Error::new(e).context("lookup server task failed")),
                };
            }
            res = &mut metrics, if metrics_running => {
                metrics_running = false;
                match res {
                    Ok(Ok(())) => warn!("Metrics server stopped, lookups continue"),
                    Ok(Err(e)) => error!("Metrics server failed, lookups continue: {:#}", e),
                    Err(e) => error!("Metrics server task failed, lookups continue: {}", e),
                }
            }
            _ = &mut shutdown_signal => {
                info!("Received shutdown signal, stopping");
                return Ok(());
            }
        }
    }
}

/// Handle one lookup request
pub async fn handle<R, B>(state: &AppState<R>, req: Request<B>) -> Response<Full<Bytes>>
where
    R: Resolve,
{
    let start = Instant::now();

    let result = match LookupParams::from_query(req.uri().query()) {
        Ok(params) => {
            let result = state.lookup(&params).await;
            match &result {
                Ok(_) => debug!(
                    namespace = %params.namespace,
                    secret = %params.secret_name,
                    key = %params.key,
                    "Secret key served"
                ),
                Err(e) => warn!(
                    namespace = %params.namespace,
                    secret = %params.secret_name,
                    key = %params.key,
                    kind = e.kind(),
                    "Secret lookup failed: {}",
                    e
                ),
            }
            result
        }
        Err(e) => {
            debug!("Rejected request with query {:?}", req.uri().query());
            Err(e)
        }
    };

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::record_lookup(outcome, start.elapsed().as_secs_f64());

    match result {
        Ok(value) => json_response(&value),
        Err(e) => error_response(&e),
    }
}

fn json_response(value: &SecretValue) -> Response<Full<Bytes>> {
    let mut body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to encode lookup result: {}", e);
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };
    body.push(b'\n');

    let mut response = Response::new(Full::new(Bytes::from(body)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(err: &Error) -> Response<Full<Bytes>> {
    text_response(err.status_code(), err.to_string())
}

fn text_response(status: StatusCode, message: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(format!("{}\n", message))));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    response
}
