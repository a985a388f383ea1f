#![forbid(unsafe_code)]

pub mod access;
pub mod api;
pub mod app;
pub mod blob_backend;
pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod observability;
pub mod package_archive;
pub mod runtime;
pub mod search_index;
pub mod stats;
pub mod status;
pub mod storage;
pub mod validate;
