//! Decryption of downloaded tracks.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use media_tracks::{DrmDescriptor, kid_hex};
use tokio::process::Command;
use tracing::debug;

use super::error::DownloadError;

#[async_trait]
pub trait TrackDecrypter: Send + Sync {
    /// Decrypt `input` into `output` with the descriptor's resolved keys.
    async fn decrypt(
        &self,
        input: &Path,
        output: &Path,
        drm: &DrmDescriptor,
    ) -> Result<(), DownloadError>;
}

/// Runs an `mp4decrypt`-compatible binary:
/// `<program> --key <kid>:<key> [--key ...] <input> <output>`.
#[derive(Debug, Clone)]
pub struct ProcessDecrypter {
    program: PathBuf,
}

impl ProcessDecrypter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn args(input: &Path, output: &Path, drm: &DrmDescriptor) -> Vec<String> {
        let mut args = Vec::new();
        for (kid, key) in drm.resolved_keys() {
            args.push("--key".to_string());
            args.push(format!("{}:{}", kid_hex(kid), key));
        }
        args.push(input.display().to_string());
        args.push(output.display().to_string());
        args
    }
}

impl Default for ProcessDecrypter {
    fn default() -> Self {
        Self::new("mp4decrypt")
    }
}

#[async_trait]
impl TrackDecrypter for ProcessDecrypter {
    async fn decrypt(
        &self,
        input: &Path,
        output: &Path,
        drm: &DrmDescriptor,
    ) -> Result<(), DownloadError> {
        let args = Self::args(input, output, drm);
        debug!(
            program = %self.program.display(),
            input = %input.display(),
            keys = drm.resolved_keys().count(),
            "Decrypting track"
        );

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !result.status.success() {
            return Err(DownloadError::Process {
                program: self.program.display().to_string(),
                code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        if !tokio::fs::try_exists(output).await? {
            return Err(DownloadError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }
}
