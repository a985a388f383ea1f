use crate::{
    error::{GalleryError, bad_request},
    validate,
};
use axum::http::{HeaderMap, header};
use semver::Version;
use serde::Deserialize;
use std::io::Read;

pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Metadata declared inside an uploaded package archive.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub id: String,
    pub version: String,
    pub min_client_version: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub authors: Option<Vec<String>>,
}

impl PackageManifest {
    /// Validates the declared id and version against the same grammar used on
    /// the read path, returning the parsed version on success.
    pub fn validated_version(&self) -> Result<Version, GalleryError> {
        if !validate::is_valid_package_id(&self.id) {
            return Err(bad_request(crate::constants::API_ERROR_INVALID_PACKAGE_ID));
        }
        validate::parse_version(&self.version)
            .ok_or_else(|| bad_request(crate::constants::API_ERROR_INVALID_VERSION))
    }

    /// Rejects archives that demand a newer client than this server.
    pub fn ensure_client_compatible(&self, server_version: &Version) -> Result<(), GalleryError> {
        let Some(raw) = self.min_client_version.as_deref() else {
            return Ok(());
        };
        let min_client = validate::parse_version(raw).ok_or_else(|| {
            bad_request(format!("the minimum client version '{raw}' is not a valid version"))
        })?;
        if &min_client > server_version {
            return Err(bad_request(format!(
                "the package requires client version '{min_client}' or above, but this server is version '{server_version}'"
            )));
        }
        Ok(())
    }
}

/// Parses the manifest entry out of an uploaded zip archive.
pub fn read_manifest(archive: &[u8]) -> Result<PackageManifest, GalleryError> {
    let cursor = std::io::Cursor::new(archive);
    let mut zip = zip::ZipArchive::new(cursor)
        .map_err(|_| bad_request("the uploaded package is not a valid zip archive"))?;
    let mut entry = zip
        .by_name(MANIFEST_ENTRY)
        .map_err(|_| bad_request("the package archive does not contain a manifest.json entry"))?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|_| bad_request("the package manifest could not be read"))?;
    serde_json::from_str(&text)
        .map_err(|err| bad_request(format!("the package manifest is invalid: {err}")))
}

/// Returns the archive bytes from a push request body. Newer clients send the
/// archive as a multipart file part; older ones send it as the raw body.
pub fn extract_upload(headers: &HeaderMap, body: Vec<u8>) -> Result<Vec<u8>, GalleryError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let Some(boundary) = multipart_boundary(content_type) else {
        return Ok(body);
    };

    first_multipart_file(&body, &boundary)
        .ok_or_else(|| bad_request("the multipart body does not contain a file part"))
}

fn multipart_boundary(content_type: &str) -> Option<String> {
    let (kind, params) = content_type.split_once(';')?;
    if !kind.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.split(';').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        Some(value.trim().trim_matches('"').to_string())
    })
}

/// Extracts the body of the first file part: parts are walked in order and
/// plain form fields are skipped until a `Content-Disposition` carrying a
/// `filename=` is found.
fn first_multipart_file(body: &[u8], boundary: &str) -> Option<Vec<u8>> {
    let open_marker = format!("--{boundary}");
    let close_marker = format!("\r\n--{boundary}");
    let mut offset = find_subslice(body, open_marker.as_bytes())? + open_marker.len();

    loop {
        let header_len = find_subslice(&body[offset..], b"\r\n\r\n")?;
        let part_headers = &body[offset..offset + header_len];
        let content_start = offset + header_len + 4;
        let content_len = find_subslice(&body[content_start..], close_marker.as_bytes())?;

        if part_is_file(part_headers) {
            return Some(body[content_start..content_start + content_len].to_vec());
        }
        offset = content_start + content_len + close_marker.len();
    }
}

fn part_is_file(part_headers: &[u8]) -> bool {
    part_headers
        .split(|&byte| byte == b'\n')
        .filter_map(|line| std::str::from_utf8(line).ok())
        .any(|line| {
            let line = line.to_ascii_lowercase();
            line.contains("content-disposition") && line.contains("filename=")
        })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
