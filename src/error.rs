use axum::{
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum GalleryError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    /// Degraded mode: the backing store rejects writes to protect itself.
    #[error("{0}")]
    ReadOnly(String),
    /// Unclassified failure. The detail is only exposed to local callers.
    #[error("internal server error")]
    Internal(String),
}

impl GalleryError {
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn read_only(message: impl Into<String>) -> Self {
        Self::ReadOnly(message.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

pub(crate) fn error_body_response(status: StatusCode, message: &str) -> Response {
    let body = serde_json::to_vec(&ErrorBody { error: message })
        .unwrap_or_else(|_| b"{\"error\":\"unknown error\"}".to_vec());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, crate::constants::HEADER_JSON)
        .body(Body::from(body))
        .unwrap_or_else(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                crate::constants::API_ERROR_INTERNAL,
            )
                .into_response()
        })
}

impl IntoResponse for GalleryError {
    fn into_response(self) -> Response {
        match self {
            GalleryError::Http { status, message } => error_body_response(status, &message),
            GalleryError::ReadOnly(message) => {
                error_body_response(StatusCode::SERVICE_UNAVAILABLE, &message)
            }
            GalleryError::Internal(_) => error_body_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                crate::constants::API_ERROR_INTERNAL,
            ),
        }
    }
}

impl From<std::io::Error> for GalleryError {
    fn from(err: std::io::Error) -> Self {
        GalleryError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GalleryError {
    fn from(err: serde_json::Error) -> Self {
        GalleryError::Internal(err.to_string())
    }
}

pub fn bad_request(message: impl Into<String>) -> GalleryError {
    GalleryError::http(StatusCode::BAD_REQUEST, message)
}

pub fn forbidden(message: impl Into<String>) -> GalleryError {
    GalleryError::http(StatusCode::FORBIDDEN, message)
}

pub fn not_found(message: impl Into<String>) -> GalleryError {
    GalleryError::http(StatusCode::NOT_FOUND, message)
}

pub fn conflict(message: impl Into<String>) -> GalleryError {
    GalleryError::http(StatusCode::CONFLICT, message)
}
