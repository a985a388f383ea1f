pub const HEADER_JSON: &str = "application/json; charset=utf-8";
pub const HEADER_OCTET: &str = "application/octet-stream";

/// API key header checked by the authorization gate.
pub const HEADER_API_KEY: &str = "x-pakhus-api-key";
/// Optional client hint recorded with download statistics.
pub const HEADER_OPERATION: &str = "x-pakhus-operation";

pub const API_ERROR_INVALID_PACKAGE_ID: &str = "The format of the package id is invalid";
pub const API_ERROR_INVALID_VERSION: &str =
    "The package version is not a valid semantic version";
pub const API_ERROR_API_KEY_REQUIRED: &str = "An API key is required for this operation";
pub const API_ERROR_API_KEY_NOT_AUTHORIZED: &str =
    "The specified API key does not provide the authority to perform this action";
pub const API_ERROR_SECURE_TRANSPORT_REQUIRED: &str =
    "This operation requires a secure connection";
pub const API_ERROR_STATUS_UNAVAILABLE: &str = "Status service is unavailable";
pub const API_ERROR_STORE_UNAVAILABLE: &str =
    "The package store is currently unavailable; retry with an explicit package version";
pub const API_ERROR_TOOL_UNAVAILABLE: &str = "No tool executable is published on this server";
pub const API_ERROR_INTERNAL: &str = "internal server error";

/// Icon served for report rows whose package declares none.
pub const DEFAULT_PACKAGE_ICON_PATH: &str = "/content/package-default-icon.png";

pub const API_MESSAGE_PACKAGE_PUBLISHED: &str = "package version published";
pub const API_MESSAGE_PACKAGE_UNLISTED: &str = "package version unlisted";
pub const API_MESSAGE_PACKAGE_LISTED: &str = "package version listed";
