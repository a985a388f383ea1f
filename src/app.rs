use crate::{
    access::ApiKeyring, api, search_index::SearchIndex, stats::DownloadRecorder,
    status::StatusSource, storage::Store,
};
use axum::{Router, routing::any};
use std::{path::PathBuf, sync::Arc, time::Duration};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub index: Arc<SearchIndex>,
    pub recorder: DownloadRecorder,
    pub status: Option<Arc<dyn StatusSource>>,
    pub keyring: ApiKeyring,
    pub data_dir: PathBuf,
    pub require_secure_transport: bool,
    pub trust_proxy: bool,
    pub max_body_size: usize,
    pub lookup_timeout: Duration,
    pub tool_path: Option<PathBuf>,
    pub tool_cache_seconds: u64,
    pub alert_path: Option<PathBuf>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new().fallback(any(api::dispatch)).with_state(state)
}
