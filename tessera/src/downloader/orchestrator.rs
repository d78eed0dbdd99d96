//! Concurrent download of a title's tracks.
//!
//! One task per track, at most `concurrent` of them past the semaphore at a
//! time. Once a track fails or the run is cancelled the gate closes: tasks
//! still waiting for a permit give up, tasks already running finish on their
//! own.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use media_tracks::{Title, Track};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::decrypt::TrackDecrypter;
use super::error::DownloadError;
use super::http::{SegmentProgress, TrackDownloader};
use super::subtitle::strip_sdh_file;
use crate::drm::KeyBroker;
use crate::events::{TitleEvent, TitleEvents, TrackEvents};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Tracks downloaded at the same time.
    pub concurrent: usize,
    /// Segments fetched at the same time within one track.
    pub segment_workers: usize,
    pub temp_dir: PathBuf,
    /// `mp4decrypt`-compatible decrypter binary.
    pub decrypter: PathBuf,
    /// Resolve keys only; skip downloading.
    pub licence_only: bool,
    /// Treat Ctrl+C as a cancellation of the run.
    ///
    /// Listening for Ctrl+C replaces the default SIGINT handler for the rest
    /// of the process, so once a run has watched for it Ctrl+C no longer
    /// terminates the process. Only enable this in a binary that cancels its
    /// own work on interrupt.
    pub handle_ctrl_c: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrent: 1,
            segment_workers: 8,
            temp_dir: std::env::temp_dir().join("tessera"),
            decrypter: PathBuf::from("mp4decrypt"),
            licence_only: false,
            handle_ctrl_c: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Tracks that completed, keys included.
    pub downloaded: usize,
    pub licence_only: bool,
    pub elapsed: Duration,
}

pub struct DownloadOrchestrator {
    config: DownloadConfig,
    broker: Arc<KeyBroker>,
    downloader: Arc<dyn TrackDownloader>,
    decrypter: Arc<dyn TrackDecrypter>,
}

impl DownloadOrchestrator {
    pub fn new(
        config: DownloadConfig,
        broker: Arc<KeyBroker>,
        downloader: Arc<dyn TrackDownloader>,
        decrypter: Arc<dyn TrackDecrypter>,
    ) -> Self {
        Self {
            config,
            broker,
            downloader,
            decrypter,
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download every video, audio and subtitle track of `title`.
    ///
    /// On success the tracks are put back into `title` in their original
    /// order with keys and paths filled in. On failure the first failing track
    /// is reported; on cancellation `DownloadError::Cancelled` is returned
    /// right away. In both cases `title` keeps its tracks as they were.
    pub async fn run(
        &self,
        title: &mut Title,
        events: &TitleEvents,
        cancel: CancellationToken,
    ) -> Result<DownloadSummary, DownloadError> {
        let started = Instant::now();
        let tracks = title.tracks.take_tracks();
        let originals = tracks.clone();
        let order: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();

        let shared_title = Arc::new(title.clone());
        let semaphore = Arc::new(Semaphore::new(self.config.concurrent.max(1)));
        let gate = cancel.child_token();

        info!(
            title = %title,
            tracks = tracks.len(),
            concurrent = self.config.concurrent.max(1),
            licence_only = self.config.licence_only,
            "Starting downloads"
        );

        let mut set = JoinSet::new();
        for track in tracks {
            let unit = TrackUnit {
                config: self.config.clone(),
                broker: self.broker.clone(),
                downloader: self.downloader.clone(),
                decrypter: self.decrypter.clone(),
                title: shared_title.clone(),
                events: events.for_track(&track.id),
                semaphore: semaphore.clone(),
                gate: gate.clone(),
            };
            set.spawn(unit.run(track));
        }

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut watch_ctrl_c = self.config.handle_ctrl_c;

        let mut completed: HashMap<String, Track> = HashMap::new();
        let mut first_failure: Option<DownloadError> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(abandon(title, originals, &gate, &mut set));
                }
                signal = &mut ctrl_c, if watch_ctrl_c => match signal {
                    Ok(()) => {
                        warn!("Interrupted, abandoning downloads");
                        return Err(abandon(title, originals, &gate, &mut set));
                    }
                    Err(e) => {
                        warn!(error = %e, "Unable to listen for Ctrl+C");
                        watch_ctrl_c = false;
                    }
                },
                joined = set.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    match joined {
                        Ok((_, Ok(Some(track)))) => {
                            completed.insert(track.id.clone(), track);
                        }
                        Ok((track_id, Ok(None))) => {
                            debug!(track = %track_id, "Track skipped after an earlier failure");
                        }
                        Ok((track_id, Err(e))) => {
                            events.emit(TitleEvent::TrackFailed {
                                track_id: track_id.clone(),
                                error: e.to_string(),
                            });
                            if first_failure.is_none() {
                                error!(track = %track_id, error = %e, "Track failed, no further tracks will start");
                                gate.cancel();
                                first_failure = Some(DownloadError::track(track_id, e));
                            } else {
                                warn!(track = %track_id, error = %e, "Another track failed");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Track task panicked");
                            gate.cancel();
                            first_failure.get_or_insert(DownloadError::Join(e));
                        }
                    }
                }
            }
        }

        if let Some(failure) = first_failure {
            restore(title, originals);
            return Err(failure);
        }

        let downloaded = completed.len();
        for id in order {
            if let Some(track) = completed.remove(&id)
                && let Err(e) = title.tracks.add(track, true)
            {
                warn!(track = %id, error = %e, "Failed to put track back");
            }
        }

        let summary = DownloadSummary {
            downloaded,
            licence_only: self.config.licence_only,
            elapsed: started.elapsed(),
        };
        info!(
            title = %title,
            downloaded = summary.downloaded,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Downloads finished"
        );
        Ok(summary)
    }
}

/// Close the gate and leave running tasks to finish in the background.
fn abandon(
    title: &mut Title,
    originals: Vec<Track>,
    gate: &CancellationToken,
    set: &mut JoinSet<(String, Result<Option<Track>, DownloadError>)>,
) -> DownloadError {
    gate.cancel();
    set.detach_all();
    restore(title, originals);
    DownloadError::Cancelled
}

fn restore(title: &mut Title, originals: Vec<Track>) {
    for track in originals {
        let _ = title.tracks.add(track, true);
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %path.display(), error = %e, "Failed to remove file");
    }
}

/// File name stem for a track's temporary files.
fn file_stem(title: &Title, track: &Track) -> String {
    format!("{}_{}", title.id, track.id)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Everything one track's task needs, owned so the task can be detached.
struct TrackUnit {
    config: DownloadConfig,
    broker: Arc<KeyBroker>,
    downloader: Arc<dyn TrackDownloader>,
    decrypter: Arc<dyn TrackDecrypter>,
    title: Arc<Title>,
    events: TrackEvents,
    semaphore: Arc<Semaphore>,
    gate: CancellationToken,
}

impl TrackUnit {
    async fn run(self, track: Track) -> (String, Result<Option<Track>, DownloadError>) {
        let track_id = track.id.clone();

        let _permit = tokio::select! {
            biased;
            _ = self.gate.cancelled() => return (track_id, Ok(None)),
            permit = self.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return (track_id, Ok(None)),
            },
        };
        if self.gate.is_cancelled() {
            return (track_id, Ok(None));
        }

        let result = self.process(track).await.map(Some);
        (track_id, result)
    }

    async fn process(&self, mut track: Track) -> Result<Track, DownloadError> {
        self.events.emit(TitleEvent::TrackStarted {
            track_id: track.id.clone(),
        });

        let track_kid = track.primary_kid();
        let drm = self
            .broker
            .prepare_keys(&self.title, &mut track, track_kid, &self.events)
            .await?;

        if self.config.licence_only {
            return Ok(track);
        }

        let stem = file_stem(&self.title, &track);
        let extension = track.extension();
        let decrypt_with = drm.filter(|d| d.resolved_keys().next().is_some());
        let downloaded = match &decrypt_with {
            Some(_) => self
                .config
                .temp_dir
                .join(format!("{stem}.encrypted.{extension}")),
            None => self.config.temp_dir.join(format!("{stem}.{extension}")),
        };

        self.download(&track, &downloaded).await?;
        if decrypt_with.is_none() {
            self.strip_sdh(&track, &downloaded).await?;
        }
        self.events.emit(TitleEvent::TrackDownloaded {
            track_id: track.id.clone(),
            path: downloaded.clone(),
        });
        self.broker.service().on_track_downloaded(&track);

        let Some(drm) = decrypt_with else {
            track.path = Some(downloaded);
            return Ok(track);
        };

        let decrypted = self.config.temp_dir.join(format!("{stem}.{extension}"));
        let decrypted_result = self.decrypter.decrypt(&downloaded, &decrypted, &drm).await;
        remove_quietly(&downloaded).await;
        if let Err(e) = decrypted_result {
            remove_quietly(&decrypted).await;
            return Err(e);
        }
        self.strip_sdh(&track, &decrypted).await?;

        track.path = Some(decrypted.clone());
        self.events.emit(TitleEvent::TrackDecrypted {
            track_id: track.id.clone(),
            path: decrypted,
        });
        self.broker.service().on_track_decrypted(&track, &drm);
        Ok(track)
    }

    /// Companions of SDH subtitles lose their hearing-impaired cues once the
    /// clear file is on disk.
    async fn strip_sdh(&self, track: &Track, path: &Path) -> Result<(), DownloadError> {
        let Some(attrs) = track.as_subtitle().filter(|a| a.strip_sdh) else {
            return Ok(());
        };
        if strip_sdh_file(path, attrs.codec).await? {
            debug!(track = %track.id, "Stripped SDH cues");
        }
        Ok(())
    }

    async fn download(&self, track: &Track, output: &Path) -> Result<u64, DownloadError> {
        let service = self.broker.service();
        let on_segment = |progress: SegmentProgress| {
            self.events.emit(TitleEvent::SegmentDownloaded {
                track_id: track.id.clone(),
                index: progress.index,
                total: progress.total,
                bytes: progress.bytes,
            });
            service.on_segment_downloaded(track, output);
        };
        self.downloader.download(track, output, &on_segment).await
    }
}
