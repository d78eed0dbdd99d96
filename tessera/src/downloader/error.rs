use std::path::PathBuf;

use thiserror::Error;

use crate::drm::DrmError;

/// Errors raised while downloading a title's tracks.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The run was interrupted. Tracks already in flight were left running.
    #[error("Cancelled")]
    Cancelled,

    /// The first track that failed, with its cause.
    #[error("Track {track_id} failed: {source}")]
    Track {
        track_id: String,
        #[source]
        source: Box<DownloadError>,
    },

    #[error(transparent)]
    Drm(#[from] DrmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("{program} exited with {code:?}: {stderr}")]
    Process {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Track {0} has no URLs")]
    NoSource(String),

    #[error("Decrypted output missing: {0}")]
    MissingOutput(PathBuf),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl DownloadError {
    pub fn track(track_id: impl Into<String>, source: DownloadError) -> Self {
        Self::Track {
            track_id: track_id.into(),
            source: Box::new(source),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The id of the failed track, when this is a per-track failure.
    pub fn track_id(&self) -> Option<&str> {
        match self {
            Self::Track { track_id, .. } => Some(track_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_error_message_names_track() {
        let err = DownloadError::track(
            "a1",
            DownloadError::Drm(DrmError::key_not_found("No Content Key for KID 00 was returned")),
        );
        assert_eq!(err.track_id(), Some("a1"));
        assert_eq!(
            err.to_string(),
            "Track a1 failed: No Content Key for KID 00 was returned"
        );
        assert!(!err.is_cancelled());
    }
}
