//! Application-wide error types.

use thiserror::Error;

use crate::downloader::DownloadError;
use crate::drm::{DrmError, ExportError};

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Vault error: {0}")]
    Vault(#[from] key_vaults::VaultError),

    #[error(transparent)]
    Drm(#[from] DrmError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Invalid track data: {0}")]
    Track(#[from] media_tracks::TrackError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<ExportError> for Error {
    fn from(e: ExportError) -> Self {
        Self::Drm(DrmError::Export(e))
    }
}
