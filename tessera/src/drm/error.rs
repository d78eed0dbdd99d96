use thiserror::Error;

/// Errors raised by a CDM during a licence exchange.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CdmError {
    /// The licence server answered without any usable licence.
    #[error("{0}")]
    EmptyLicense(String),

    /// The licence did not contain a key the caller needed.
    #[error("{0}")]
    KeyNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl CdmError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<reqwest::Error> for CdmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Other(e.to_string())
    }
}

/// Failures resolving the keys of a track.
#[derive(Debug, Error)]
pub enum DrmError {
    #[error("{0}")]
    KeyNotFound(String),

    #[error("{0}")]
    EmptyLicense(String),

    #[error("{0}")]
    Exchange(String),

    #[error("A Widevine CDM is required but none is configured for this service")]
    CdmRequired,

    #[error("Failed to export keys: {0}")]
    Export(#[from] ExportError),
}

impl DrmError {
    pub fn key_not_found(msg: impl Into<String>) -> Self {
        Self::KeyNotFound(msg.into())
    }

    /// Keep recognised exchange failures as-is, wrap everything else.
    pub fn from_exchange(err: CdmError) -> Self {
        match err {
            CdmError::EmptyLicense(msg) => Self::EmptyLicense(msg),
            CdmError::KeyNotFound(msg) => Self::KeyNotFound(msg),
            CdmError::Other(msg) => Self::Exchange(format!("An exception occurred: {msg}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_errors_keep_recognised_messages() {
        let err = DrmError::from_exchange(CdmError::EmptyLicense("No License was returned".into()));
        assert!(matches!(err, DrmError::EmptyLicense(_)));
        assert_eq!(err.to_string(), "No License was returned");

        let err = DrmError::from_exchange(CdmError::other("connection reset"));
        assert_eq!(err.to_string(), "An exception occurred: connection reset");
    }
}
