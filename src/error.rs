//! Error types for the secret lookup service

use std::time::Duration;

use hyper::StatusCode;

/// Result type for the service
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the service
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One of the required query parameters is empty or absent
    #[error("Missing namespace, secretName, or key parameter")]
    MissingParameter,

    /// Neither an in-cluster configuration nor a kubeconfig could be loaded
    #[error("{0}")]
    ConnectionUnavailable(String),

    /// The API client could not be built from a resolved configuration
    #[error("failed to create clientset: {0}")]
    ClientBuild(String),

    /// The Secret or its namespace does not exist
    #[error("failed to get secret: {0}")]
    NotFound(String),

    /// The resolved credentials may not read the Secret
    #[error("failed to get secret: {0}")]
    Forbidden(String),

    /// Any other API or network failure
    #[error("failed to get secret: {0}")]
    Transport(String),

    /// The Secret exists but has no entry for the requested key
    #[error("key {key} not found in secret {secret}")]
    KeyMissing { key: String, secret: String },

    /// The lookup did not finish before the request deadline
    #[error("timed out after {0:?} waiting for the Kubernetes API")]
    Timeout(Duration),

    /// Invalid startup configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingParameter => "missing_parameter",
            Error::ConnectionUnavailable(_) => "connection_unavailable",
            Error::ClientBuild(_) => "client_build",
            Error::NotFound(_) => "not_found",
            Error::Forbidden(_) => "forbidden",
            Error::Transport(_) => "transport",
            Error::KeyMissing { .. } => "key_missing",
            Error::Timeout(_) => "timeout",
            Error::Config(_) => "config",
        }
    }

    /// HTTP status returned to the caller for this error.
    ///
    /// Every lookup failure maps to 500. Only a bad request and an exceeded
    /// deadline differ.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingParameter => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Classify a failed Secrets API read
    pub fn from_kube(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => Error::NotFound(resp.message),
            kube::Error::Api(resp) if resp.code == 401 || resp.code == 403 => {
                Error::Forbidden(resp.message)
            }
            other => Error::Transport(other.to_string()),
        }
    }
}
