use thiserror::Error;

/// Errors raised while building or mutating the track model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackError {
    #[error("duplicate track id `{0}`: track ids must be unique and stable across requests")]
    DuplicateTrack(String),

    #[error("invalid language tag `{0}`")]
    InvalidLanguage(String),

    #[error("invalid content key `{input}`: {reason}")]
    InvalidContentKey { input: String, reason: String },

    #[error("invalid key id `{0}`")]
    InvalidKid(String),

    #[error("invalid PSSH box: {0}")]
    InvalidPssh(String),

    #[error("unknown {kind} `{value}`")]
    UnknownVariant { kind: &'static str, value: String },
}

impl TrackError {
    pub fn invalid_content_key(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidContentKey {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_pssh(reason: impl Into<String>) -> Self {
        Self::InvalidPssh(reason.into())
    }
}
