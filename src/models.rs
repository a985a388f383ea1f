use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One published version inside a registration. `version` is always stored in
/// its normalized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageVersionRecord {
    pub version: String,
    pub listed: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub min_client_version: Option<String>,
    pub published_by: String,
    pub published_at: i64,
    pub downloads: u64,
}

impl PackageVersionRecord {
    pub fn is_prerelease(&self) -> bool {
        semver::Version::parse(&self.version)
            .map(|version| !version.pre.is_empty())
            .unwrap_or(false)
    }
}

/// Identity record for a package id, aggregating all published versions and
/// the users allowed to push to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRegistration {
    pub id: String,
    pub owners: Vec<String>,
    pub versions: Vec<PackageVersionRecord>,
}

impl PackageRegistration {
    pub fn is_owner(&self, user: &str) -> bool {
        self.owners.iter().any(|owner| owner.eq_ignore_ascii_case(user))
    }

    pub fn find_version(&self, normalized: &str) -> Option<&PackageVersionRecord> {
        self.versions
            .iter()
            .find(|record| record.version.eq_ignore_ascii_case(normalized))
    }

    pub fn has_version(&self, normalized: &str) -> bool {
        self.find_version(normalized).is_some()
    }
}

/// Whole-store snapshot persisted as JSON, keyed by lowercased package id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedState {
    pub registrations: HashMap<String, PackageRegistration>,
}

/// One download, recorded best-effort off the request path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadEvent {
    pub event_id: String,
    pub package_id: String,
    pub version: String,
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
    pub operation: Option<String>,
    pub recorded_at: i64,
}

/// Row of the precomputed download-statistics report. Field names match the
/// published report format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadReportRow {
    #[serde(rename = "PackageId")]
    pub package_id: String,
    #[serde(rename = "PackageVersion")]
    pub package_version: String,
    #[serde(rename = "PackageTitle")]
    pub package_title: Option<String>,
    #[serde(rename = "PackageDescription")]
    pub package_description: Option<String>,
    #[serde(rename = "PackageIconUrl")]
    pub package_icon_url: Option<String>,
    #[serde(rename = "Downloads")]
    pub downloads: u64,
}
