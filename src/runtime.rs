use crate::{
    access::ApiKeyring,
    app::{AppState, build_router},
    config::Config,
    error::GalleryError,
    observability,
    search_index::SearchIndex,
    stats::DownloadRecorder,
    status::{StatusSource, StoreStatusSource},
    storage::Store,
};
use axum::http::StatusCode;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::instrument;

#[instrument(skip(config, status_source))]
pub async fn build_state(
    config: &Config,
    status_source: Option<Arc<dyn StatusSource>>,
) -> Result<AppState, GalleryError> {
    let store = Arc::new(Store::open(config).await?);

    let index = Arc::new(SearchIndex::new());
    index.rebuild(&store.registrations().await).await;

    let status = if config.status_enabled {
        Some(status_source.unwrap_or_else(|| {
            Arc::new(StoreStatusSource::new(Arc::clone(&store))) as Arc<dyn StatusSource>
        }))
    } else {
        None
    };

    let recorder = DownloadRecorder::spawn(Arc::clone(&store), config.stats_channel_capacity);

    Ok(AppState {
        store,
        index,
        recorder,
        status,
        keyring: ApiKeyring::from_config(&config.api_keys),
        data_dir: config.data_dir.clone(),
        require_secure_transport: config.require_secure_transport,
        trust_proxy: config.trust_proxy,
        max_body_size: config.max_body_size,
        lookup_timeout: Duration::from_millis(config.lookup_timeout_ms),
        tool_path: config.tool_path.clone(),
        tool_cache_seconds: config.tool_cache_seconds,
        alert_path: config.alert_path.clone(),
    })
}

pub async fn run(
    config: Config,
    status_source: Option<Arc<dyn StatusSource>>,
) -> Result<(), GalleryError> {
    let bind = config.bind;
    let data_dir = config.data_dir.display().to_string();
    let read_only = config.read_only;
    let state = build_state(&config, status_source).await?;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;

    tracing::info!(
        bind = %bind,
        data_dir,
        read_only,
        "pakhus listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| GalleryError::internal(err.to_string()))
}

pub async fn run_standalone(config: Config) -> Result<(), GalleryError> {
    let default_level = startup_log_level(&config).to_string();
    let tracing_settings = observability::init_from_env(&default_level);
    tracing::debug!(
        log_filter = tracing_settings.filter,
        log_format = tracing_settings.log_format.as_str(),
        "initialized tracing subscriber"
    );
    run(config, None).await
}

pub async fn run_from_env() -> Result<(), GalleryError> {
    let config = Config::from_env().map_err(|err| {
        GalleryError::http(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("invalid runtime configuration: {err}"),
        )
    })?;
    run_standalone(config).await
}

fn startup_log_level(config: &Config) -> &str {
    config.log_level.as_str()
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        let terminate = async {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                let _ = sigterm.recv().await;
            }
        };
        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
