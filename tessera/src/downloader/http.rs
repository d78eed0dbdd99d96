//! Byte-level track acquisition.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use media_tracks::Track;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use super::error::DownloadError;

/// One segment written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentProgress {
    /// Zero-based segment index.
    pub index: usize,
    pub total: usize,
    pub bytes: u64,
}

/// Called after each segment is appended to the output file.
pub type SegmentCallback<'a> = &'a (dyn Fn(SegmentProgress) + Send + Sync);

/// Downloads a track's bytes to a single file.
#[async_trait]
pub trait TrackDownloader: Send + Sync {
    /// Write `track` to `output`, returning the number of bytes written.
    async fn download(
        &self,
        track: &Track,
        output: &Path,
        on_segment: SegmentCallback<'_>,
    ) -> Result<u64, DownloadError>;
}

/// Fetches a track's URLs over HTTP and concatenates them in order.
///
/// Up to `workers` segments are in flight at once; they are still written in
/// URL order.
#[derive(Debug, Clone)]
pub struct HttpSegmentDownloader {
    client: Client,
    workers: usize,
}

impl HttpSegmentDownloader {
    pub fn new(workers: usize) -> Result<Self, DownloadError> {
        key_vaults::install_rustls_provider();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .read_timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self::with_client(client, workers))
    }

    pub fn with_client(client: Client, workers: usize) -> Self {
        Self {
            client,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

async fn fetch(client: Client, url: Url) -> Result<Bytes, DownloadError> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response.bytes().await?)
}

impl HttpSegmentDownloader {
    /// Append every segment of `track` to `file`, in playback order.
    async fn write_segments(
        &self,
        track: &Track,
        file: &mut tokio::fs::File,
        on_segment: SegmentCallback<'_>,
    ) -> Result<u64, DownloadError> {
        let total = track.urls.len();
        let mut segments = futures::stream::iter(track.urls.iter().cloned())
            .map(|url| fetch(self.client.clone(), url))
            .buffered(self.workers);

        let mut written = 0u64;
        let mut index = 0;
        while let Some(segment) = segments.next().await {
            let segment = segment?;
            file.write_all(&segment).await?;
            let bytes = segment.len() as u64;
            written += bytes;
            on_segment(SegmentProgress {
                index,
                total,
                bytes,
            });
            index += 1;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl TrackDownloader for HttpSegmentDownloader {
    async fn download(
        &self,
        track: &Track,
        output: &Path,
        on_segment: SegmentCallback<'_>,
    ) -> Result<u64, DownloadError> {
        if track.urls.is_empty() {
            return Err(DownloadError::NoSource(track.id.clone()));
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let total = track.urls.len();
        let mut file = tokio::fs::File::create(output).await?;
        let written = match self.write_segments(track, &mut file, on_segment).await {
            Ok(written) => written,
            Err(e) => {
                drop(file);
                if let Err(remove) = tokio::fs::remove_file(output).await {
                    debug!(path = %output.display(), error = %remove, "Failed to remove partial file");
                }
                return Err(e);
            }
        };

        debug!(
            track = %track.id,
            segments = total,
            bytes = written,
            path = %output.display(),
            "Track downloaded"
        );
        Ok(written)
    }
}
