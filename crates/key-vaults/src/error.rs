use media_tracks::TrackError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vault API returned code {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Vault `{0}` is configured more than once")]
    DuplicateVault(String),

    #[error("Invalid data in vault: {0}")]
    InvalidData(#[from] TrackError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VaultError {
    pub fn api(code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
