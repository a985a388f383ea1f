use crate::models::PackageRegistration;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Per-package listing summary kept consistent with the store. Only listed
/// versions are visible through the index.
#[derive(Debug, Clone)]
struct IndexEntry {
    id: String,
    has_listed_stable: bool,
    has_listed_prerelease: bool,
}

/// In-memory index over the package listing state. Rebuilt at startup and
/// refreshed whenever a publish, unlist or relist changes a registration.
#[derive(Default)]
pub struct SearchIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self, registrations), fields(count = registrations.len()))]
    pub async fn rebuild(&self, registrations: &[PackageRegistration]) {
        let mut entries = self.entries.write().await;
        entries.clear();
        for registration in registrations {
            entries.insert(
                registration.id.to_ascii_lowercase(),
                Self::entry_for(registration),
            );
        }
        debug!("search index rebuilt");
    }

    /// Refreshes the index entry for a single package after its listing
    /// state changed.
    #[instrument(skip(self, registration), fields(id = registration.id))]
    pub async fn update_package(&self, registration: &PackageRegistration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            registration.id.to_ascii_lowercase(),
            Self::entry_for(registration),
        );
    }

    /// Ids matching a case-insensitive prefix, ordered alphabetically. An
    /// empty prefix matches everything. Packages whose only listed versions
    /// are prereleases appear only when `include_prerelease` is set.
    pub async fn matching_ids(&self, partial_id: &str, include_prerelease: bool) -> Vec<String> {
        let needle = partial_id.to_ascii_lowercase();
        let entries = self.entries.read().await;
        let mut ids: Vec<String> = entries
            .values()
            .filter(|entry| {
                entry.has_listed_stable || (include_prerelease && entry.has_listed_prerelease)
            })
            .filter(|entry| entry.id.to_ascii_lowercase().starts_with(&needle))
            .map(|entry| entry.id.clone())
            .collect();
        ids.sort_by(|left, right| left.to_ascii_lowercase().cmp(&right.to_ascii_lowercase()));
        ids
    }

    fn entry_for(registration: &PackageRegistration) -> IndexEntry {
        let mut has_listed_stable = false;
        let mut has_listed_prerelease = false;
        for record in &registration.versions {
            if !record.listed {
                continue;
            }
            if record.is_prerelease() {
                has_listed_prerelease = true;
            } else {
                has_listed_stable = true;
            }
        }
        IndexEntry {
            id: registration.id.clone(),
            has_listed_stable,
            has_listed_prerelease,
        }
    }
}
