use crate::{
    error::GalleryError,
    models::{DownloadEvent, DownloadReportRow},
    storage::Store,
};
use chrono::Utc;
use std::{path::Path, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Relative to the data directory. The report is produced by an external
/// aggregation pipeline; this layer only reads it.
pub const DOWNLOAD_REPORT_PATH: &str = "stats/downloads.json";

/// Fire-and-forget download recording. Events go through a bounded channel
/// into a worker that applies them to the store; nothing on this path may
/// fail the request that produced the event.
#[derive(Clone)]
pub struct DownloadRecorder {
    tx: mpsc::Sender<DownloadEvent>,
}

impl DownloadRecorder {
    pub fn spawn(store: Arc<Store>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<DownloadEvent>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match store.apply_download(&event).await {
                    Ok(()) => {}
                    // Read-only mode: losing statistics is acceptable.
                    Err(GalleryError::ReadOnly(_)) => {
                        debug!(id = event.package_id, "download event dropped in read-only mode");
                    }
                    Err(err) => {
                        warn!(id = event.package_id, error = %err, "failed to record download event");
                    }
                }
            }
        });
        Self { tx }
    }

    /// Queues an event; drops it with a warning when the channel is full or
    /// the worker is gone.
    pub fn record(&self, event: DownloadEvent) {
        if let Err(err) = self.tx.try_send(event) {
            warn!(error = %err, "download statistics channel rejected event, dropping");
        }
    }
}

pub fn download_event(
    package_id: &str,
    version: &str,
    user_agent: Option<String>,
    client_ip: Option<String>,
    operation: Option<String>,
) -> DownloadEvent {
    DownloadEvent {
        event_id: Uuid::new_v4().to_string(),
        package_id: package_id.to_string(),
        version: version.to_string(),
        user_agent,
        client_ip,
        operation,
        recorded_at: Utc::now().timestamp_millis(),
    }
}

/// Loads the precomputed download report. `None` means no report has been
/// published yet, which the API surfaces as not-found.
pub async fn load_download_report(data_dir: &Path) -> Option<Vec<DownloadReportRow>> {
    let path = data_dir.join(DOWNLOAD_REPORT_PATH);
    let bytes = tokio::fs::read(&path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(rows) => Some(rows),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "download report exists but is unreadable");
            None
        }
    }
}
