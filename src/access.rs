use crate::{
    constants::{
        API_ERROR_API_KEY_NOT_AUTHORIZED, API_ERROR_API_KEY_REQUIRED,
        API_ERROR_SECURE_TRANSPORT_REQUIRED, HEADER_API_KEY,
    },
    error::{GalleryError, forbidden},
};
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use std::{collections::HashMap, sync::Arc};
use tracing::warn;

/// Authorization gate: resolves the API key header to a username. Raw keys
/// are digested at load time so only digests are held at runtime.
#[derive(Clone, Default)]
pub struct ApiKeyring {
    keys: Arc<HashMap<String, String>>,
}

impl ApiKeyring {
    pub fn from_config(api_keys: &HashMap<String, String>) -> Self {
        let keys = api_keys
            .iter()
            .map(|(key, user)| (digest(key), user.clone()))
            .collect();
        Self {
            keys: Arc::new(keys),
        }
    }

    pub fn resolve(&self, raw_key: &str) -> Option<&str> {
        self.keys.get(&digest(raw_key)).map(String::as_str)
    }
}

fn digest(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Resolves the caller from the API key header. 403 when the header is
/// missing or the key is unknown, matching the upstream authorization
/// filter's behavior.
pub fn authenticate(keyring: &ApiKeyring, headers: &HeaderMap) -> Result<String, GalleryError> {
    let Some(raw_key) = headers
        .get(HEADER_API_KEY)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Err(forbidden(API_ERROR_API_KEY_REQUIRED));
    };

    match keyring.resolve(raw_key) {
        Some(user) => Ok(user.to_string()),
        None => {
            warn!("request presented an unknown api key");
            Err(forbidden(API_ERROR_API_KEY_NOT_AUTHORIZED))
        }
    }
}

/// Transport security gate. The server itself terminates plain HTTP, so a
/// secure scheme can only be observed via the proxy header, and only when
/// the proxy is trusted.
pub fn ensure_secure_transport(
    headers: &HeaderMap,
    require_secure_transport: bool,
    trust_proxy: bool,
) -> Result<(), GalleryError> {
    if !require_secure_transport {
        return Ok(());
    }

    let forwarded_scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if trust_proxy && forwarded_scheme.eq_ignore_ascii_case("https") {
        return Ok(());
    }

    Err(forbidden(API_ERROR_SECURE_TRANSPORT_REQUIRED))
}
