use pakhus::config::{BlobStorageBackend, Config};
use std::io::Write;
use tempfile::NamedTempFile;

fn yaml_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("tempfile");
    file.write_all(contents.as_bytes()).expect("write yaml");
    file
}

#[test]
fn loads_full_yaml_config_from_disk() {
    let file = yaml_file(
        r#"
listen: "127.0.0.1:6200"
dataDir: ./data
readOnly: true
maxBodySize: 5mb
apiKeys:
  push-token: carol
status:
  enable: false
alert:
  path: ./alert.txt
log:
  level: debug
"#,
    );

    let cfg = Config::from_yaml_file(file.path().to_path_buf()).expect("load config");
    assert_eq!(cfg.bind.port(), 6200);
    assert!(cfg.read_only);
    assert_eq!(cfg.max_body_size, 5 * 1024 * 1024);
    assert_eq!(cfg.api_keys.get("push-token").map(String::as_str), Some("carol"));
    assert!(!cfg.status_enabled);
    assert_eq!(
        cfg.alert_path,
        Some(std::path::PathBuf::from("./alert.txt"))
    );
    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.blob_storage.backend, BlobStorageBackend::Local);
}

#[test]
fn yaml_storage_section_selects_s3_backend() {
    let file = yaml_file(
        r#"
storage:
  backend: s3
  s3:
    bucket: gallery-archives
    region: eu-north-1
    endpoint: http://localhost:9000
    forcePathStyle: true
"#,
    );

    let cfg = Config::from_yaml_file(file.path().to_path_buf()).expect("load config");
    assert_eq!(cfg.blob_storage.backend, BlobStorageBackend::S3);
    let s3 = cfg.blob_storage.s3.expect("s3 section");
    assert_eq!(s3.bucket, "gallery-archives");
    assert_eq!(s3.region, "eu-north-1");
    assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
    assert!(s3.force_path_style);
}

#[test]
fn invalid_listen_address_is_an_error() {
    let file = yaml_file("listen: \"not-an-address\"\n");
    let err = Config::from_yaml_file(file.path().to_path_buf()).expect_err("invalid listen");
    assert!(err.contains("not-an-address"), "{err}");
}

#[test]
fn missing_file_is_an_error() {
    let err = Config::from_yaml_file("/definitely/not/here.yml".into()).expect_err("missing file");
    assert!(err.contains("failed to read"), "{err}");
}
