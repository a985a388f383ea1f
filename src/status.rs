use crate::{error::GalleryError, storage::Store};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

/// Health reporting collaborator. The route returns 503 when none is wired.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn current_status(&self) -> Result<Value, GalleryError>;
}

/// Default status source backed by the registration store.
pub struct StoreStatusSource {
    store: Arc<Store>,
}

impl StoreStatusSource {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StatusSource for StoreStatusSource {
    async fn current_status(&self) -> Result<Value, GalleryError> {
        Ok(json!({
            "service": "pakhus",
            "version": env!("CARGO_PKG_VERSION"),
            "storage": self.store.storage_health().await,
        }))
    }
}
