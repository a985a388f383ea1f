use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use pakhus::{
    app::build_router,
    config::Config,
    constants::{HEADER_API_KEY, HEADER_OPERATION},
    runtime,
};
use serde_json::Value;
use std::{io::Write, path::PathBuf};
use tempfile::TempDir;
use tower::ServiceExt;
use zip::write::{FileOptions, ZipWriter};

fn test_config(data_dir: PathBuf) -> Config {
    let mut cfg = Config::defaults_for_examples();
    cfg.data_dir = data_dir;
    cfg.api_keys.insert("alice-key".to_string(), "alice".to_string());
    cfg.api_keys.insert("bob-key".to_string(), "bob".to_string());
    cfg
}

async fn test_app(cfg: &Config) -> axum::Router {
    let state = runtime::build_state(cfg, None).await.expect("state");
    build_router(state)
}

async fn default_app(dir: &TempDir) -> axum::Router {
    test_app(&test_config(dir.path().to_path_buf())).await
}

fn archive(id: &str, version: &str) -> Vec<u8> {
    let manifest = format!(r#"{{"id":"{id}","version":"{version}","description":"test package"}}"#);
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    zip.start_file::<_, ()>("manifest.json", FileOptions::default())
        .expect("start manifest");
    zip.write_all(manifest.as_bytes()).expect("write manifest");
    zip.start_file::<_, ()>("lib/payload.bin", FileOptions::default())
        .expect("start payload");
    zip.write_all(version.as_bytes()).expect("write payload");
    zip.finish().expect("finish zip").into_inner()
}

async fn push(app: &axum::Router, key: Option<&str>, body: Vec<u8>) -> Response {
    let mut builder = Request::builder()
        .method(Method::PUT)
        .uri("/api/v2/package")
        .header(header::CONTENT_TYPE, "application/octet-stream");
    if let Some(key) = key {
        builder = builder.header(HEADER_API_KEY, key);
    }
    app.clone()
        .oneshot(builder.body(Body::from(body)).expect("request"))
        .await
        .expect("response")
}

async fn get(app: &axum::Router, uri: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response")
}

async fn authed(app: &axum::Router, method: Method, uri: &str, key: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(HEADER_API_KEY, key)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response")
}

async fn response_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

async fn response_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
        .to_vec()
}

#[tokio::test]
async fn publish_then_fetch_latest_stable() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    let old = archive("Foo", "1.0.0");
    let new = archive("Foo", "1.1.0");
    assert_eq!(push(&app, Some("alice-key"), old).await.status(), StatusCode::CREATED);
    assert_eq!(push(&app, Some("alice-key"), new.clone()).await.status(), StatusCode::CREATED);

    let response = get(&app, "/api/v2/package/Foo").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
        Some("application/octet-stream")
    );
    assert_eq!(response_bytes(response).await, new);
}

#[tokio::test]
async fn prerelease_versions_are_not_latest() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    let stable = archive("Foo", "1.0.0");
    assert_eq!(push(&app, Some("alice-key"), stable.clone()).await.status(), StatusCode::CREATED);
    assert_eq!(
        push(&app, Some("alice-key"), archive("Foo", "2.0.0-beta.1")).await.status(),
        StatusCode::CREATED
    );

    let response = get(&app, "/api/v2/package/Foo").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_bytes(response).await, stable);
}

#[tokio::test]
async fn explicit_version_fetch_accepts_short_versions() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;
    assert_eq!(
        push(&app, Some("alice-key"), archive("Foo", "1.0.0")).await.status(),
        StatusCode::CREATED
    );

    // "1.0" normalizes to "1.0.0".
    let response = get(&app, "/api/v2/package/Foo/1.0").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_id_and_version_are_rejected_up_front() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    let response = get(&app, "/api/v2/package/Foo..Bar").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(
        body["error"].as_str(),
        Some("The format of the package id is invalid")
    );

    let response = get(&app, "/api/v2/package/Foo/1.0.0.0").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(&app, "/api/v2/package-versions/Foo%20Bar").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_package_yields_not_found_with_detail() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    let response = get(&app, "/api/v2/package/Missing/1.2.3").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    let message = body["error"].as_str().expect("error message");
    assert!(message.contains("Missing"), "{message}");
    assert!(message.contains("1.2.3"), "{message}");
}

#[tokio::test]
async fn duplicate_version_conflicts() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    assert_eq!(
        push(&app, Some("alice-key"), archive("Foo", "1.0.0")).await.status(),
        StatusCode::CREATED
    );
    let response = push(&app, Some("alice-key"), archive("Foo", "1.0.0")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response).await;
    let message = body["error"].as_str().expect("error message");
    assert!(message.contains("Foo"), "{message}");
    assert!(message.contains("1.0.0"), "{message}");
}

#[tokio::test]
async fn publish_requires_a_known_api_key() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    assert_eq!(
        push(&app, None, archive("Foo", "1.0.0")).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        push(&app, Some("nope"), archive("Foo", "1.0.0")).await.status(),
        StatusCode::FORBIDDEN
    );
    // No registration was created by the rejected pushes.
    assert_eq!(
        get(&app, "/api/v2/package/Foo").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn only_owners_can_push_new_versions() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    assert_eq!(
        push(&app, Some("alice-key"), archive("Foo", "1.0.0")).await.status(),
        StatusCode::CREATED
    );
    assert_eq!(
        push(&app, Some("bob-key"), archive("Foo", "2.0.0")).await.status(),
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn unlist_and_relist_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;
    assert_eq!(
        push(&app, Some("alice-key"), archive("Foo", "1.0.0")).await.status(),
        StatusCode::CREATED
    );

    // A non-owner cannot change the listing state.
    assert_eq!(
        authed(&app, Method::DELETE, "/api/v2/package/Foo/1.0.0", "bob-key").await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(get(&app, "/api/v2/package/Foo").await.status(), StatusCode::OK);

    assert_eq!(
        authed(&app, Method::DELETE, "/api/v2/package/Foo/1.0.0", "alice-key").await.status(),
        StatusCode::OK
    );
    // Unlisted versions no longer resolve as latest but remain fetchable by
    // explicit version.
    assert_eq!(
        get(&app, "/api/v2/package/Foo").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        get(&app, "/api/v2/package/Foo/1.0.0").await.status(),
        StatusCode::OK
    );

    assert_eq!(
        authed(&app, Method::POST, "/api/v2/package/Foo/1.0.0", "alice-key").await.status(),
        StatusCode::OK
    );
    assert_eq!(get(&app, "/api/v2/package/Foo").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn unlisting_unknown_version_is_not_found() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;
    assert_eq!(
        authed(&app, Method::DELETE, "/api/v2/package/Foo/1.0.0", "alice-key").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn verify_key_checks_key_and_ownership() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;
    assert_eq!(
        push(&app, Some("alice-key"), archive("Foo", "1.0.0")).await.status(),
        StatusCode::CREATED
    );

    assert_eq!(
        authed(&app, Method::GET, "/api/v2/verify-key", "alice-key").await.status(),
        StatusCode::OK
    );
    assert_eq!(
        get(&app, "/api/v2/verify-key").await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        authed(&app, Method::GET, "/api/v2/verify-key/Foo", "alice-key").await.status(),
        StatusCode::OK
    );
    assert_eq!(
        authed(&app, Method::GET, "/api/v2/verify-key/Foo/1.0.0", "alice-key").await.status(),
        StatusCode::OK
    );
    assert_eq!(
        authed(&app, Method::GET, "/api/v2/verify-key/Foo", "bob-key").await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        authed(&app, Method::GET, "/api/v2/verify-key/Missing", "alice-key").await.status(),
        StatusCode::NOT_FOUND
    );

    // An unlisted version still verifies when named explicitly.
    assert_eq!(
        authed(&app, Method::DELETE, "/api/v2/package/Foo/1.0.0", "alice-key").await.status(),
        StatusCode::OK
    );
    assert_eq!(
        authed(&app, Method::GET, "/api/v2/verify-key/Foo/1.0.0", "alice-key").await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn package_ids_match_prefix_and_hide_prerelease_only_packages() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    for (id, version) in [("Foo", "1.0.0"), ("Foolish", "1.0.0"), ("Bar", "2.0.0")] {
        assert_eq!(
            push(&app, Some("alice-key"), archive(id, version)).await.status(),
            StatusCode::CREATED
        );
    }
    assert_eq!(
        push(&app, Some("alice-key"), archive("Experimental", "1.0.0-beta.1")).await.status(),
        StatusCode::CREATED
    );

    let body = response_json(get(&app, "/api/v2/package-ids?partialId=fo").await).await;
    assert_eq!(body, serde_json::json!(["Foo", "Foolish"]));

    let body = response_json(get(&app, "/api/v2/package-ids?partialId=exp").await).await;
    assert_eq!(body, serde_json::json!([]));

    let body = response_json(
        get(&app, "/api/v2/package-ids?partialId=exp&includePrerelease=true").await,
    )
    .await;
    assert_eq!(body, serde_json::json!(["Experimental"]));
}

#[tokio::test]
async fn package_versions_lists_listed_versions_in_order() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    for version in ["1.1.0", "1.0.0", "2.0.0-beta.1"] {
        assert_eq!(
            push(&app, Some("alice-key"), archive("Foo", version)).await.status(),
            StatusCode::CREATED
        );
    }

    let body = response_json(get(&app, "/api/v2/package-versions/Foo").await).await;
    assert_eq!(body, serde_json::json!(["1.0.0", "1.1.0"]));

    let body = response_json(
        get(&app, "/api/v2/package-versions/Foo?includePrerelease=true").await,
    )
    .await;
    assert_eq!(body, serde_json::json!(["1.0.0", "1.1.0", "2.0.0-beta.1"]));

    let body = response_json(get(&app, "/api/v2/package-versions/Unknown").await).await;
    assert_eq!(body, serde_json::json!([]));
}

#[tokio::test]
async fn download_statistics_come_from_the_published_report() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    assert_eq!(
        get(&app, "/api/v2/stats/downloads").await.status(),
        StatusCode::NOT_FOUND
    );

    let stats_dir = dir.path().join("stats");
    std::fs::create_dir_all(&stats_dir).expect("mkdir");
    std::fs::write(
        stats_dir.join("downloads.json"),
        r#"[
            {"PackageId":"Foo","PackageVersion":"1.0.0","PackageTitle":null,"PackageDescription":null,"PackageIconUrl":null,"Downloads":90},
            {"PackageId":"Bar","PackageVersion":"2.0.0","PackageTitle":null,"PackageDescription":null,"PackageIconUrl":null,"Downloads":10}
        ]"#,
    )
    .expect("write report");

    let response = get(&app, "/api/v2/stats/downloads?count=1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let rows = body.as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["PackageId"].as_str(), Some("Foo"));
    assert_eq!(rows[0]["Downloads"].as_u64(), Some(90));
    // Display defaults for rows without a title or icon.
    assert_eq!(rows[0]["PackageTitle"].as_str(), Some("Foo"));
    assert_eq!(
        rows[0]["PackageIconUrl"].as_str(),
        Some("/content/package-default-icon.png")
    );
}

#[tokio::test]
async fn tool_route_serves_configured_archive_with_cache_header() {
    let dir = TempDir::new().expect("tempdir");

    let mut cfg = test_config(dir.path().to_path_buf());
    let app = test_app(&cfg).await;
    assert_eq!(get(&app, "/api/v2/tool").await.status(), StatusCode::NOT_FOUND);

    let tool_file = dir.path().join("tool.zip");
    std::fs::write(&tool_file, b"tool bytes").expect("write tool");
    cfg.tool_path = Some(tool_file);
    cfg.tool_cache_seconds = 120;
    let app = test_app(&cfg).await;

    let response = get(&app, "/api/v2/tool").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|value| value.to_str().ok()),
        Some("public, max-age=120")
    );
    assert_eq!(response_bytes(response).await, b"tool bytes".to_vec());
}

#[tokio::test]
async fn service_alert_is_empty_until_configured() {
    let dir = TempDir::new().expect("tempdir");

    let app = default_app(&dir).await;
    let response = get(&app, "/api/v2/service-alert").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response_bytes(response).await.is_empty());

    let alert_file = dir.path().join("alert.txt");
    std::fs::write(&alert_file, b"maintenance at 02:00 UTC").expect("write alert");
    let mut cfg = test_config(dir.path().to_path_buf());
    cfg.alert_path = Some(alert_file);
    let app = test_app(&cfg).await;

    let response = get(&app, "/api/v2/service-alert").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_bytes(response).await,
        b"maintenance at 02:00 UTC".to_vec()
    );
}

#[tokio::test]
async fn status_route_reports_service_health() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    let response = get(&app, "/api/v2/status").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["service"].as_str(), Some("pakhus"));

    let mut cfg = test_config(dir.path().to_path_buf());
    cfg.status_enabled = false;
    let app = test_app(&cfg).await;
    assert_eq!(
        get(&app, "/api/v2/status").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn read_only_mode_rejects_writes_but_serves_reads() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;
    assert_eq!(
        push(&app, Some("alice-key"), archive("Foo", "1.0.0")).await.status(),
        StatusCode::CREATED
    );

    let mut cfg = test_config(dir.path().to_path_buf());
    cfg.read_only = true;
    let app = test_app(&cfg).await;

    let response = push(&app, Some("alice-key"), archive("Foo", "2.0.0")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        authed(&app, Method::DELETE, "/api/v2/package/Foo/1.0.0", "alice-key").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(get(&app, "/api/v2/package/Foo").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn secure_transport_gate_honors_trusted_proxy_header() {
    let dir = TempDir::new().expect("tempdir");
    let mut cfg = test_config(dir.path().to_path_buf());
    cfg.require_secure_transport = true;
    cfg.trust_proxy = true;
    let app = test_app(&cfg).await;

    assert_eq!(
        push(&app, Some("alice-key"), archive("Foo", "1.0.0")).await.status(),
        StatusCode::FORBIDDEN
    );

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/api/v2/package")
        .header(HEADER_API_KEY, "alice-key")
        .header("x-forwarded-proto", "https")
        .body(Body::from(archive("Foo", "1.0.0")))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn multipart_push_extracts_the_file_part() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    let payload = archive("Foo", "1.0.0");
    let mut body = Vec::new();
    // A plain form field ahead of the file part must not be mistaken for
    // the archive.
    body.extend_from_slice(b"--boundary42\r\n");
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"comment\"\r\n\r\n");
    body.extend_from_slice(b"first release\r\n");
    body.extend_from_slice(b"--boundary42\r\n");
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"package\"; filename=\"foo.zip\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(&payload);
    body.extend_from_slice(b"\r\n--boundary42--\r\n");

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/api/v2/package")
        .header(HEADER_API_KEY, "alice-key")
        .header(
            header::CONTENT_TYPE,
            "multipart/form-data; boundary=boundary42",
        )
        .body(Body::from(body))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);

    assert_eq!(
        response_bytes(get(&app, "/api/v2/package/Foo/1.0.0").await).await,
        payload
    );
}

#[tokio::test]
async fn download_operation_header_is_accepted() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;
    assert_eq!(
        push(&app, Some("alice-key"), archive("Foo", "1.0.0")).await.status(),
        StatusCode::CREATED
    );

    let request = Request::builder()
        .uri("/api/v2/package/Foo/1.0.0")
        .header(HEADER_OPERATION, "Install")
        .header(header::USER_AGENT, "pakhus-test/1.0")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn package_content_route_bypasses_metadata() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;

    let payload = archive("Foo", "1.0.0");
    assert_eq!(push(&app, Some("alice-key"), payload.clone()).await.status(), StatusCode::CREATED);

    let response = get(&app, "/api/v2/package-content/Foo/1.0.0").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_bytes(response).await, payload);

    assert_eq!(
        get(&app, "/api/v2/package-content/Foo/9.9.9").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn unmatched_routes_are_not_found() {
    let dir = TempDir::new().expect("tempdir");
    let app = default_app(&dir).await;
    assert_eq!(get(&app, "/api/v2/nope").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(get(&app, "/elsewhere").await.status(), StatusCode::NOT_FOUND);

    // Wrong method on a known path.
    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/api/v2/tool")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
