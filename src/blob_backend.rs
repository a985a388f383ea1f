use crate::{
    config::{BlobStorageBackend, Config},
    error::GalleryError,
};
use axum::http::StatusCode;
use std::path::PathBuf;
use tracing::{debug, instrument};

#[cfg(feature = "s3")]
use crate::config::S3BlobStorageConfig;
#[cfg(feature = "s3")]
use tracing::warn;

/// Storage for package archive bytes, keyed by package id and archive
/// filename. The registration metadata lives in the store; this only holds
/// the binary content.
#[derive(Debug, Clone)]
pub enum BlobBackend {
    Local(LocalBlobBackend),
    #[cfg(feature = "s3")]
    S3(S3BlobBackend),
}

impl BlobBackend {
    #[instrument(skip(config), fields(backend = ?config.blob_storage.backend, data_dir = %config.data_dir.display()))]
    pub async fn from_config(config: &Config) -> Result<Self, GalleryError> {
        match config.blob_storage.backend {
            BlobStorageBackend::Local => {
                let root = config.data_dir.join("packages");
                tokio::fs::create_dir_all(&root).await?;
                debug!(root = %root.display(), "initialized local blob backend");
                Ok(Self::Local(LocalBlobBackend::new(root)))
            }
            BlobStorageBackend::S3 => {
                #[cfg(feature = "s3")]
                {
                    let Some(s3) = config.blob_storage.s3.as_ref() else {
                        return Err(GalleryError::http(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "s3 blob backend configured without s3 section",
                        ));
                    };
                    Ok(Self::S3(S3BlobBackend::new(s3).await?))
                }
                #[cfg(not(feature = "s3"))]
                {
                    Err(GalleryError::http(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "s3 blob backend is not compiled in (enable `s3` feature)",
                    ))
                }
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            #[cfg(feature = "s3")]
            Self::S3(_) => "s3",
        }
    }

    pub async fn put(
        &self,
        package: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<(), GalleryError> {
        match self {
            Self::Local(backend) => backend.put(package, filename, content).await,
            #[cfg(feature = "s3")]
            Self::S3(backend) => backend.put(package, filename, content).await,
        }
    }

    pub async fn get(
        &self,
        package: &str,
        filename: &str,
    ) -> Result<Option<Vec<u8>>, GalleryError> {
        match self {
            Self::Local(backend) => backend.get(package, filename).await,
            #[cfg(feature = "s3")]
            Self::S3(backend) => backend.get(package, filename).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalBlobBackend {
    root: PathBuf,
}

impl LocalBlobBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn blob_path(&self, package: &str, filename: &str) -> PathBuf {
        self.root.join(package).join(filename)
    }

    #[instrument(skip(self, content), fields(package, filename, bytes = content.len()))]
    pub async fn put(
        &self,
        package: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<(), GalleryError> {
        let path = self.blob_path(package, filename);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        debug!(path = %path.display(), "wrote package archive to local storage");
        Ok(())
    }

    #[instrument(skip(self), fields(package, filename))]
    pub async fn get(
        &self,
        package: &str,
        filename: &str,
    ) -> Result<Option<Vec<u8>>, GalleryError> {
        let path = self.blob_path(package, filename);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "local package archive missing");
            return Ok(None);
        }
        Ok(Some(tokio::fs::read(path).await?))
    }
}

#[cfg(feature = "s3")]
#[derive(Debug, Clone)]
pub struct S3BlobBackend {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

#[cfg(feature = "s3")]
impl S3BlobBackend {
    #[instrument(skip(cfg), fields(bucket = cfg.bucket, region = cfg.region, endpoint = cfg.endpoint.as_deref().unwrap_or("<aws-default>")))]
    pub async fn new(cfg: &S3BlobStorageConfig) -> Result<Self, GalleryError> {
        if cfg.bucket.trim().is_empty() {
            return Err(GalleryError::http(
                StatusCode::INTERNAL_SERVER_ERROR,
                "s3.bucket is required for s3 blob backend",
            ));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(cfg.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (cfg.access_key_id.clone(), cfg.secret_access_key.clone())
        {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "pakhus-static",
            ));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = cfg.endpoint.clone() {
            builder = builder.endpoint_url(endpoint);
        }
        if cfg.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: cfg.bucket.clone(),
            prefix: normalize_prefix(&cfg.prefix),
        })
    }

    fn key(&self, package: &str, filename: &str) -> String {
        format!("{}{package}/{filename}", self.prefix)
    }

    #[instrument(skip(self, content), fields(package, filename, bytes = content.len()))]
    pub async fn put(
        &self,
        package: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<(), GalleryError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(package, filename))
            .body(aws_sdk_s3::primitives::ByteStream::from(content.to_vec()))
            .send()
            .await
            .map_err(|err| GalleryError::internal(err.to_string()))?;
        debug!("uploaded package archive to s3");
        Ok(())
    }

    #[instrument(skip(self), fields(package, filename))]
    pub async fn get(
        &self,
        package: &str,
        filename: &str,
    ) -> Result<Option<Vec<u8>>, GalleryError> {
        let key = self.key(package, filename);
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if is_not_found(&err) => return Ok(None),
            Err(err) => {
                warn!("s3 get_object failed");
                return Err(GalleryError::internal(err.to_string()));
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|err| GalleryError::internal(err.to_string()))?;
        Ok(Some(bytes.into_bytes().to_vec()))
    }
}

#[cfg(feature = "s3")]
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

#[cfg(feature = "s3")]
fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    err.raw_response()
        .map(|response| response.status().as_u16() == 404)
        .unwrap_or(false)
}
