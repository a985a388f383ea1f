use crate::{
    access::{authenticate, ensure_secure_transport},
    app::AppState,
    constants::{
        API_ERROR_INVALID_PACKAGE_ID, API_ERROR_INVALID_VERSION, API_ERROR_STATUS_UNAVAILABLE,
        API_ERROR_STORE_UNAVAILABLE, API_ERROR_TOOL_UNAVAILABLE, API_MESSAGE_PACKAGE_LISTED,
        API_MESSAGE_PACKAGE_PUBLISHED, API_MESSAGE_PACKAGE_UNLISTED, DEFAULT_PACKAGE_ICON_PATH,
        HEADER_JSON, HEADER_OCTET, HEADER_OPERATION,
    },
    error::{GalleryError, bad_request, conflict, error_body_response, forbidden, not_found},
    package_archive, stats,
    storage::Store,
    validate,
};
use axum::{
    body::{Body, to_bytes},
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use semver::Version;
use serde_json::{Value, json};
use std::{collections::HashMap, net::SocketAddr};
use tracing::{debug, warn};

/// Single entry point for the whole API surface. Routes are matched on the
/// decoded path segments after the `/api/v2` prefix.
pub async fn dispatch(State(state): State<AppState>, req: Request<Body>) -> Response {
    let caller_local = caller_is_local(&req);
    match route(state, req).await {
        Ok(response) => response,
        Err(err) => error_response(err, caller_local),
    }
}

async fn route(state: AppState, req: Request<Body>) -> Result<Response, GalleryError> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(ToOwned::to_owned);
    let headers = req.headers().clone();
    debug!(method = %method, path, "dispatching request");

    let Some(rest) = path.strip_prefix("/api/v2") else {
        return Err(not_found("not found"));
    };
    let segments: Vec<String> = rest
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(decode)
        .collect();
    let seg: Vec<&str> = segments.iter().map(String::as_str).collect();

    match seg[..] {
        ["package"] if method == Method::PUT || method == Method::POST => {
            ensure_secure_transport(&headers, state.require_secure_transport, state.trust_proxy)?;
            let user = authenticate(&state.keyring, &headers)?;
            let body = read_body(req, state.max_body_size).await?;
            handle_push(&state, &headers, &user, body).await
        }
        ["package", id] if method == Method::GET => {
            handle_fetch_package(&state, &headers, id, None).await
        }
        ["package", id, version] if method == Method::GET => {
            handle_fetch_package(&state, &headers, id, Some(version)).await
        }
        ["package", id, version] if method == Method::DELETE || method == Method::POST => {
            ensure_secure_transport(&headers, state.require_secure_transport, state.trust_proxy)?;
            let user = authenticate(&state.keyring, &headers)?;
            handle_set_listed(&state, &user, id, version, method == Method::POST).await
        }
        ["package-content", id, version] if method == Method::GET => {
            handle_package_content(&state, id, version).await
        }
        ["tool"] if method == Method::GET => handle_fetch_tool(&state).await,
        ["status"] if method == Method::GET => handle_status(&state).await,
        ["service-alert"] if method == Method::GET => handle_service_alert(&state).await,
        ["verify-key"] if method == Method::GET => {
            ensure_secure_transport(&headers, state.require_secure_transport, state.trust_proxy)?;
            let user = authenticate(&state.keyring, &headers)?;
            handle_verify_key(&state, &user, None, None).await
        }
        ["verify-key", id] if method == Method::GET => {
            ensure_secure_transport(&headers, state.require_secure_transport, state.trust_proxy)?;
            let user = authenticate(&state.keyring, &headers)?;
            handle_verify_key(&state, &user, Some(id), None).await
        }
        ["verify-key", id, version] if method == Method::GET => {
            ensure_secure_transport(&headers, state.require_secure_transport, state.trust_proxy)?;
            let user = authenticate(&state.keyring, &headers)?;
            handle_verify_key(&state, &user, Some(id), Some(version)).await
        }
        ["package-ids"] if method == Method::GET => {
            handle_package_ids(&state, query.as_deref()).await
        }
        ["package-versions", id] if method == Method::GET => {
            handle_package_versions(&state, id, query.as_deref()).await
        }
        ["stats", "downloads"] if method == Method::GET => {
            handle_download_statistics(&state, query.as_deref()).await
        }
        _ => {
            warn!(method = %method, path, "no route matched");
            Err(not_found("not found"))
        }
    }
}

/// Internal error detail is only shown to callers on the local loopback that
/// did not arrive through a proxy.
fn error_response(err: GalleryError, caller_local: bool) -> Response {
    match err {
        GalleryError::Internal(detail) if caller_local => {
            warn!(detail, "request failed");
            error_body_response(StatusCode::INTERNAL_SERVER_ERROR, &detail)
        }
        GalleryError::Internal(detail) => {
            warn!(detail, "request failed");
            GalleryError::Internal(detail).into_response()
        }
        other => other.into_response(),
    }
}

fn caller_is_local(req: &Request<Body>) -> bool {
    if req.headers().contains_key("x-forwarded-for") {
        return false;
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().is_loopback())
        .unwrap_or(false)
}

/// Publishes a new package version. The store re-checks ownership and
/// duplicates under its write lock; the checks here only produce early
/// responses for the common cases.
async fn handle_push(
    state: &AppState,
    headers: &HeaderMap,
    user: &str,
    body: Vec<u8>,
) -> Result<Response, GalleryError> {
    let archive = package_archive::extract_upload(headers, body)?;
    let manifest = package_archive::read_manifest(&archive)?;
    let version = manifest.validated_version()?;
    let normalized = validate::normalize_version(&version);

    let server_version = Version::parse(env!("CARGO_PKG_VERSION"))
        .map_err(|err| GalleryError::internal(err.to_string()))?;
    manifest.ensure_client_compatible(&server_version)?;

    if let Some(registration) = state.store.registration(&manifest.id).await {
        if !registration.is_owner(user) {
            warn!(id = manifest.id, user, "publish rejected: not an owner");
            return Err(forbidden(
                crate::constants::API_ERROR_API_KEY_NOT_AUTHORIZED,
            ));
        }
        if registration.has_version(&normalized) {
            return Err(conflict(Store::version_conflict_message(
                &manifest.id,
                &normalized,
            )));
        }
    }

    let registration = state
        .store
        .register_version(&manifest, &normalized, user)
        .await?;
    state.store.save_blob(&manifest.id, &normalized, &archive).await?;
    state.index.update_package(&registration).await;

    debug!(id = manifest.id, version = normalized, "package published");
    json_response(
        StatusCode::CREATED,
        json!({ "ok": API_MESSAGE_PACKAGE_PUBLISHED }),
    )
}

/// Resolves an id plus optional version to an archive download. A bare id
/// resolves to the latest listed stable version.
async fn handle_fetch_package(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
    raw_version: Option<&str>,
) -> Result<Response, GalleryError> {
    if !validate::is_valid_package_id(id) {
        return Err(bad_request(API_ERROR_INVALID_PACKAGE_ID));
    }
    let normalized = match raw_version {
        Some(raw) => Some(
            validate::parse_version(raw)
                .map(|version| validate::normalize_version(&version))
                .ok_or_else(|| bad_request(API_ERROR_INVALID_VERSION))?,
        ),
        None => None,
    };

    let lookup = tokio::time::timeout(
        state.lookup_timeout,
        state.store.find_package(id, normalized.as_deref(), false),
    )
    .await;

    match lookup {
        Ok(Some(resolved)) => {
            record_download(state, headers, &resolved.id, &resolved.version.version);
            match state
                .store
                .read_blob(&resolved.id, &resolved.version.version)
                .await?
            {
                Some(bytes) => Ok(bytes_response(bytes)),
                None => {
                    warn!(id = resolved.id, version = resolved.version.version,
                        "registration exists but archive is missing");
                    Err(not_found(Store::package_not_found_message(
                        &resolved.id,
                        Some(&resolved.version.version),
                    )))
                }
            }
        }
        Ok(None) => Err(not_found(Store::package_not_found_message(
            id,
            normalized.as_deref(),
        ))),
        // Metadata is slow or down. With an explicit version we can still
        // point the client at the archive directly; without one there is no
        // way to resolve "latest".
        Err(_) => match normalized {
            Some(version) => {
                warn!(id, version, "metadata lookup timed out, redirecting to content");
                record_download(state, headers, id, &version);
                Ok(redirect_response(&content_path(id, &version)))
            }
            None => {
                warn!(id, "metadata lookup timed out");
                Err(GalleryError::http(
                    StatusCode::SERVICE_UNAVAILABLE,
                    API_ERROR_STORE_UNAVAILABLE,
                ))
            }
        },
    }
}

/// Serves archive bytes straight from the blob backend, bypassing the
/// registration metadata. This is the target of timeout redirects.
async fn handle_package_content(
    state: &AppState,
    id: &str,
    raw_version: &str,
) -> Result<Response, GalleryError> {
    if !validate::is_valid_package_id(id) {
        return Err(bad_request(API_ERROR_INVALID_PACKAGE_ID));
    }
    let version = validate::parse_version(raw_version)
        .map(|version| validate::normalize_version(&version))
        .ok_or_else(|| bad_request(API_ERROR_INVALID_VERSION))?;

    match state.store.read_blob(id, &version).await? {
        Some(bytes) => Ok(bytes_response(bytes)),
        None => Err(not_found(Store::package_not_found_message(
            id,
            Some(&version),
        ))),
    }
}

async fn handle_set_listed(
    state: &AppState,
    user: &str,
    id: &str,
    raw_version: &str,
    listed: bool,
) -> Result<Response, GalleryError> {
    if !validate::is_valid_package_id(id) {
        return Err(bad_request(API_ERROR_INVALID_PACKAGE_ID));
    }
    let version = validate::parse_version(raw_version)
        .map(|version| validate::normalize_version(&version))
        .ok_or_else(|| bad_request(API_ERROR_INVALID_VERSION))?;

    let Some(registration) = state.store.registration(id).await else {
        return Err(not_found(Store::package_not_found_message(
            id,
            Some(&version),
        )));
    };
    if registration.find_version(&version).is_none() {
        return Err(not_found(Store::package_not_found_message(
            id,
            Some(&version),
        )));
    }
    if !registration.is_owner(user) {
        warn!(id, user, "listing change rejected: not an owner");
        return Err(forbidden(
            crate::constants::API_ERROR_API_KEY_NOT_AUTHORIZED,
        ));
    }

    let updated = state
        .store
        .set_listed(id, &version, listed)
        .await?
        .ok_or_else(|| not_found(Store::package_not_found_message(id, Some(&version))))?;
    state.index.update_package(&updated).await;

    let message = if listed {
        API_MESSAGE_PACKAGE_LISTED
    } else {
        API_MESSAGE_PACKAGE_UNLISTED
    };
    json_response(StatusCode::OK, json!({ "ok": message }))
}

async fn handle_fetch_tool(state: &AppState) -> Result<Response, GalleryError> {
    let Some(path) = &state.tool_path else {
        return Err(not_found(API_ERROR_TOOL_UNAVAILABLE));
    };
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "tool archive is configured but unreadable");
            return Err(not_found(API_ERROR_TOOL_UNAVAILABLE));
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HEADER_OCTET)
        .header(
            header::CACHE_CONTROL,
            format!("public, max-age={}", state.tool_cache_seconds),
        )
        .body(Body::from(bytes))
        .map_err(|err| GalleryError::internal(err.to_string()))
}

/// Operator-published alert text shown by clients. No alert configured (or
/// an unreadable file) is an empty alert, not an error.
async fn handle_service_alert(state: &AppState) -> Result<Response, GalleryError> {
    let alert = match &state.alert_path {
        Some(path) => match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "service alert file not readable");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(alert))
        .map_err(|err| GalleryError::internal(err.to_string()))
}

async fn handle_status(state: &AppState) -> Result<Response, GalleryError> {
    let Some(source) = &state.status else {
        return Err(GalleryError::http(
            StatusCode::SERVICE_UNAVAILABLE,
            API_ERROR_STATUS_UNAVAILABLE,
        ));
    };
    json_response(StatusCode::OK, source.current_status().await?)
}

/// Credential probe. With an id the key must also own that package; with a
/// version the id+version pair must exist. Succeeds with an empty body.
async fn handle_verify_key(
    state: &AppState,
    user: &str,
    id: Option<&str>,
    raw_version: Option<&str>,
) -> Result<Response, GalleryError> {
    if let Some(id) = id {
        if !validate::is_valid_package_id(id) {
            return Err(bad_request(API_ERROR_INVALID_PACKAGE_ID));
        }
        let normalized = match raw_version {
            Some(raw) => Some(
                validate::parse_version(raw)
                    .map(|version| validate::normalize_version(&version))
                    .ok_or_else(|| bad_request(API_ERROR_INVALID_VERSION))?,
            ),
            None => None,
        };

        // An explicit version matches even when unlisted, and a bare id
        // resolves latest across prereleases but only among listed versions.
        if state
            .store
            .find_package(id, normalized.as_deref(), true)
            .await
            .is_none()
        {
            return Err(not_found(Store::package_not_found_message(
                id,
                normalized.as_deref(),
            )));
        }
        let Some(registration) = state.store.registration(id).await else {
            return Err(not_found(Store::package_not_found_message(
                id,
                normalized.as_deref(),
            )));
        };
        if !registration.is_owner(user) {
            return Err(forbidden(
                crate::constants::API_ERROR_API_KEY_NOT_AUTHORIZED,
            ));
        }
    }

    Response::builder()
        .status(StatusCode::OK)
        .body(Body::empty())
        .map_err(|err| GalleryError::internal(err.to_string()))
}

async fn handle_package_ids(
    state: &AppState,
    query: Option<&str>,
) -> Result<Response, GalleryError> {
    let params = query_params(query.unwrap_or_default());
    let partial_id = params.get("partialId").map(String::as_str).unwrap_or("");
    let include_prerelease = flag(&params, "includePrerelease");

    let ids = state.index.matching_ids(partial_id, include_prerelease).await;
    json_response(StatusCode::OK, json!(ids))
}

async fn handle_package_versions(
    state: &AppState,
    id: &str,
    query: Option<&str>,
) -> Result<Response, GalleryError> {
    if !validate::is_valid_package_id(id) {
        return Err(bad_request(API_ERROR_INVALID_PACKAGE_ID));
    }
    let params = query_params(query.unwrap_or_default());
    let include_prerelease = flag(&params, "includePrerelease");

    let versions = state.store.version_list(id, include_prerelease).await;
    json_response(StatusCode::OK, json!(versions))
}

async fn handle_download_statistics(
    state: &AppState,
    query: Option<&str>,
) -> Result<Response, GalleryError> {
    let params = query_params(query.unwrap_or_default());
    let count = params
        .get("count")
        .and_then(|value| value.parse::<usize>().ok());

    let Some(mut rows) = stats::load_download_report(&state.data_dir).await else {
        return Err(not_found("no download report is available"));
    };
    if let Some(count) = count {
        rows.truncate(count);
    }
    let rows: Vec<Value> = rows.into_iter().map(report_row_json).collect();
    json_response(StatusCode::OK, json!(rows))
}

/// Display shaping for report rows: an absent title falls back to the
/// package id and an absent icon to the gallery's default icon.
fn report_row_json(row: crate::models::DownloadReportRow) -> Value {
    let title = row
        .package_title
        .unwrap_or_else(|| row.package_id.clone());
    let icon_url = row
        .package_icon_url
        .unwrap_or_else(|| DEFAULT_PACKAGE_ICON_PATH.to_string());
    json!({
        "PackageId": row.package_id,
        "PackageVersion": row.package_version,
        "PackageTitle": title,
        "PackageDescription": row.package_description,
        "PackageIconUrl": icon_url,
        "Downloads": row.downloads,
    })
}

fn record_download(state: &AppState, headers: &HeaderMap, id: &str, version: &str) {
    let header_value = |name: header::HeaderName| {
        headers
            .get(&name)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned)
    };
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_owned());
    let operation = headers
        .get(HEADER_OPERATION)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned);

    state.recorder.record(stats::download_event(
        id,
        version,
        header_value(header::USER_AGENT),
        client_ip,
        operation,
    ));
}

fn content_path(id: &str, version: &str) -> String {
    format!(
        "/api/v2/package-content/{}/{}",
        urlencoding::encode(id),
        urlencoding::encode(version)
    )
}

fn decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

fn query_params(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(name), decode(value))
        })
        .collect()
}

fn flag(params: &HashMap<String, String>, name: &str) -> bool {
    params
        .get(name)
        .map(|value| value.eq_ignore_ascii_case("true") || value == "1")
        .unwrap_or(false)
}

fn json_response(status: StatusCode, value: Value) -> Result<Response, GalleryError> {
    let body = serde_json::to_vec(&value)?;
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, HEADER_JSON)
        .body(Body::from(body))
        .map_err(|err| GalleryError::internal(err.to_string()))
}

fn bytes_response(bytes: Vec<u8>) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HEADER_OCTET)
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn redirect_response(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn read_body(req: Request<Body>, max_body_size: usize) -> Result<Vec<u8>, GalleryError> {
    let bytes = to_bytes(req.into_body(), max_body_size)
        .await
        .map_err(|_| {
            GalleryError::http(
                StatusCode::PAYLOAD_TOO_LARGE,
                "the request body exceeds the configured size limit",
            )
        })?;
    Ok(bytes.to_vec())
}
