use crate::{
    blob_backend::BlobBackend,
    config::Config,
    error::{GalleryError, conflict, forbidden},
    models::{DownloadEvent, PackageRegistration, PackageVersionRecord, PersistedState},
    package_archive::PackageManifest,
};
use chrono::Utc;
use semver::Version;
use serde_json::{Value, json};
use std::path::PathBuf;
use tokio::{io::AsyncWriteExt, sync::RwLock};
use tracing::{debug, instrument, warn};

/// Package registration store. Metadata lives in a JSON snapshot behind a
/// write lock; archive bytes live in the blob backend. Registration writes
/// commit the snapshot before any blob is touched.
pub struct Store {
    state: RwLock<PersistedState>,
    state_file: PathBuf,
    events_file: PathBuf,
    blob_backend: BlobBackend,
    read_only: bool,
}

/// A resolved id+version pair. `id` carries the original casing from the
/// registration.
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub id: String,
    pub version: PackageVersionRecord,
}

impl Store {
    #[instrument(skip(config), fields(data_dir = %config.data_dir.display(), read_only = config.read_only))]
    pub async fn open(config: &Config) -> Result<Self, GalleryError> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let blob_backend = BlobBackend::from_config(config).await?;

        let state_file = config.data_dir.join("state.json");
        let state = if tokio::fs::try_exists(&state_file).await.unwrap_or(false) {
            let bytes = tokio::fs::read(&state_file).await?;
            if bytes.is_empty() {
                PersistedState::default()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            PersistedState::default()
        };

        let store = Self {
            state: RwLock::new(state),
            state_file,
            events_file: config.data_dir.join("downloads.jsonl"),
            blob_backend,
            read_only: config.read_only,
        };
        debug!("store initialized");
        Ok(store)
    }

    pub fn package_not_found_message(id: &str, version: Option<&str>) -> String {
        match version {
            Some(version) => {
                format!("a package with id '{id}' and version '{version}' does not exist")
            }
            None => format!("a package with id '{id}' does not exist"),
        }
    }

    pub fn version_conflict_message(id: &str, version: &str) -> String {
        format!(
            "a package with id '{id}' and version '{version}' already exists and cannot be modified"
        )
    }

    fn read_only_message() -> String {
        "the package store is in read-only mode and is not accepting writes".to_string()
    }

    fn ensure_writable(&self) -> Result<(), GalleryError> {
        if self.read_only {
            return Err(GalleryError::read_only(Self::read_only_message()));
        }
        Ok(())
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn archive_filename(id: &str, version: &str) -> String {
        format!("{}.{version}.zip", id.to_ascii_lowercase())
    }

    async fn persist_snapshot(&self, snapshot: &PersistedState) -> Result<(), GalleryError> {
        let tmp_file = self.state_file.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp_file, bytes).await?;
        tokio::fs::rename(&tmp_file, &self.state_file).await?;
        Ok(())
    }

    pub async fn registration(&self, id: &str) -> Option<PackageRegistration> {
        let state = self.state.read().await;
        state.registrations.get(&id.to_ascii_lowercase()).cloned()
    }

    pub async fn registrations(&self) -> Vec<PackageRegistration> {
        let state = self.state.read().await;
        state.registrations.values().cloned().collect()
    }

    pub async fn package_count(&self) -> usize {
        let state = self.state.read().await;
        state.registrations.len()
    }

    /// Resolves an id plus optional normalized version. An absent version
    /// means "latest": the highest listed version, excluding prereleases
    /// unless `allow_prerelease` is set.
    #[instrument(skip(self), fields(id, version = version.unwrap_or("<latest>")))]
    pub async fn find_package(
        &self,
        id: &str,
        version: Option<&str>,
        allow_prerelease: bool,
    ) -> Option<ResolvedPackage> {
        let state = self.state.read().await;
        let registration = state.registrations.get(&id.to_ascii_lowercase())?;

        let record = match version {
            Some(version) => registration.find_version(version)?.clone(),
            None => registration
                .versions
                .iter()
                .filter(|record| record.listed)
                .filter(|record| allow_prerelease || !record.is_prerelease())
                .filter_map(|record| {
                    Version::parse(&record.version)
                        .ok()
                        .map(|parsed| (parsed, record))
                })
                .max_by(|(left, _), (right, _)| left.cmp(right))
                .map(|(_, record)| record.clone())?,
        };

        Some(ResolvedPackage {
            id: registration.id.clone(),
            version: record,
        })
    }

    /// Registers a new package version. This is the authority for conflict
    /// and ownership decisions; any pre-check in the handler is advisory.
    /// First push for an unknown id makes the pushing user the owner.
    #[instrument(skip(self, manifest), fields(id = manifest.id, version = normalized))]
    pub async fn register_version(
        &self,
        manifest: &PackageManifest,
        normalized: &str,
        user: &str,
    ) -> Result<PackageRegistration, GalleryError> {
        self.ensure_writable()?;

        let mut state = self.state.write().await;
        let key = manifest.id.to_ascii_lowercase();

        if let Some(registration) = state.registrations.get(&key) {
            if !registration.is_owner(user) {
                warn!(user, "publish rejected: not an owner");
                return Err(forbidden(
                    crate::constants::API_ERROR_API_KEY_NOT_AUTHORIZED,
                ));
            }
            if registration.has_version(normalized) {
                return Err(conflict(Self::version_conflict_message(
                    &manifest.id,
                    normalized,
                )));
            }
        }

        let record = PackageVersionRecord {
            version: normalized.to_string(),
            listed: true,
            title: manifest.title.clone(),
            description: manifest.description.clone(),
            icon_url: manifest.icon_url.clone(),
            min_client_version: manifest.min_client_version.clone(),
            published_by: user.to_string(),
            published_at: Self::now_ms(),
            downloads: 0,
        };

        let registration = state
            .registrations
            .entry(key)
            .or_insert_with(|| PackageRegistration {
                id: manifest.id.clone(),
                owners: vec![user.to_string()],
                versions: Vec::new(),
            });
        registration.versions.push(record);
        let updated = registration.clone();

        self.persist_snapshot(&state).await?;
        debug!("registered package version");
        Ok(updated)
    }

    /// Flips the listed flag on a version. Returns the updated registration,
    /// or `None` when the id+version does not exist.
    #[instrument(skip(self), fields(id, version, listed))]
    pub async fn set_listed(
        &self,
        id: &str,
        version: &str,
        listed: bool,
    ) -> Result<Option<PackageRegistration>, GalleryError> {
        self.ensure_writable()?;

        let mut state = self.state.write().await;
        let Some(registration) = state.registrations.get_mut(&id.to_ascii_lowercase()) else {
            return Ok(None);
        };
        let Some(record) = registration
            .versions
            .iter_mut()
            .find(|record| record.version.eq_ignore_ascii_case(version))
        else {
            return Ok(None);
        };

        record.listed = listed;
        let updated = registration.clone();
        self.persist_snapshot(&state).await?;
        debug!("updated listed flag");
        Ok(Some(updated))
    }

    /// Applies one download event: bumps the per-version counter and appends
    /// the event to the download log. Called from the statistics worker, off
    /// the request path.
    #[instrument(skip(self, event), fields(id = event.package_id, version = event.version))]
    pub async fn apply_download(&self, event: &DownloadEvent) -> Result<(), GalleryError> {
        self.ensure_writable()?;

        let mut state = self.state.write().await;
        if let Some(record) = state
            .registrations
            .get_mut(&event.package_id.to_ascii_lowercase())
            .and_then(|registration| {
                registration
                    .versions
                    .iter_mut()
                    .find(|record| record.version.eq_ignore_ascii_case(&event.version))
            })
        {
            record.downloads += 1;
        }
        self.persist_snapshot(&state).await?;
        drop(state);

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_file)
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }

    /// Listed versions for an id, in ascending version order. Unknown ids
    /// yield an empty sequence.
    pub async fn version_list(&self, id: &str, include_prerelease: bool) -> Vec<String> {
        let state = self.state.read().await;
        let Some(registration) = state.registrations.get(&id.to_ascii_lowercase()) else {
            return Vec::new();
        };

        let mut versions: Vec<Version> = registration
            .versions
            .iter()
            .filter(|record| record.listed)
            .filter(|record| include_prerelease || !record.is_prerelease())
            .filter_map(|record| Version::parse(&record.version).ok())
            .collect();
        versions.sort();
        versions.into_iter().map(|version| version.to_string()).collect()
    }

    pub async fn save_blob(
        &self,
        id: &str,
        version: &str,
        content: &[u8],
    ) -> Result<(), GalleryError> {
        self.ensure_writable()?;
        let package = id.to_ascii_lowercase();
        let filename = Self::archive_filename(id, version);
        self.blob_backend.put(&package, &filename, content).await
    }

    pub async fn read_blob(&self, id: &str, version: &str) -> Result<Option<Vec<u8>>, GalleryError> {
        let package = id.to_ascii_lowercase();
        let filename = Self::archive_filename(id, version);
        self.blob_backend.get(&package, &filename).await
    }

    pub async fn storage_health(&self) -> Value {
        json!({
            "backend": self.blob_backend.label(),
            "packages": self.package_count().await,
            "read_only": self.read_only,
        })
    }
}
