//! Kubernetes secret fetching utilities

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A single key of a Secret, as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretValue {
    pub key: String,
    pub value: String,
}

/// Fetch a secret by name from the given namespace
pub async fn get_secret(client: &Client, namespace: &str, name: &str) -> Result<Secret> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    secrets
        .get(name)
        .await
        .map_err(Error::from_kube)
}

/// Get a specific key from a secret
///
/// `data` values arrive already base64-decoded. Bytes that are not UTF-8
/// are replaced with U+FFFD.
pub fn get_secret_key(secret: &Secret, secret_name: &str, key: &str) -> Result<SecretValue> {
    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(|| Error::KeyMissing {
            key: key.to_string(),
            secret: secret_name.to_string(),
        })?;

    Ok(SecretValue {
        key: key.to_string(),
        value: String::from_utf8_lossy(&value.0).into_owned(),
    })
}

/// Read one key of a Secret through the given client
pub async fn lookup(
    client: &Client,
    namespace: &str,
    secret_name: &str,
    key: &str,
) -> Result<SecretValue> {
    let secret = get_secret(client, namespace, secret_name).await?;
    get_secret_key(&secret, secret_name, key)
}
