//! Error types for asset loading, record files and configuration.
//!
//! Not-ready and kind-mismatch conditions are no-ops, never errors.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("unsupported media: {0} (supported: {supported})", supported = crate::loader::SUPPORTED_MEDIA)]
    UnsupportedMedia(String),

    #[error("media has no frames: {0}")]
    Empty(String),
}

#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing value for {0}")]
    MissingValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },

    #[error("config file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: RecordError,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("cannot create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),

    #[error("no compatible graphics adapter")]
    NoAdapter,

    #[error("cannot open device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}
