//! Per-title event bus.
//!
//! One `TitleEvents` lives for the duration of a single title's download and
//! is passed explicitly to whoever emits. Subscribers (progress UI, tests)
//! key their state by `track_id`; events from concurrently running tracks
//! interleave.

use std::path::PathBuf;

use media_tracks::ContentKey;
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TitleEvent {
    /// A track's unit of work acquired its slot.
    TrackStarted { track_id: String },
    /// A protection header is about to be resolved.
    PsshInit {
        track_id: String,
        scheme: String,
        pssh: String,
    },
    KeyFound {
        track_id: String,
        kid: String,
        key: ContentKey,
        /// `from <vault>` or `from CDM`.
        source: String,
        /// Whether `kid` is the key the track's own content is encrypted with.
        is_track_kid: bool,
    },
    DrmError { track_id: String, message: String },
    SegmentDownloaded {
        track_id: String,
        index: usize,
        total: usize,
        bytes: u64,
    },
    TrackDownloaded { track_id: String, path: PathBuf },
    TrackDecrypted { track_id: String, path: PathBuf },
    TrackFailed { track_id: String, error: String },
}

impl TitleEvent {
    pub fn track_id(&self) -> &str {
        match self {
            Self::TrackStarted { track_id }
            | Self::PsshInit { track_id, .. }
            | Self::KeyFound { track_id, .. }
            | Self::DrmError { track_id, .. }
            | Self::SegmentDownloaded { track_id, .. }
            | Self::TrackDownloaded { track_id, .. }
            | Self::TrackDecrypted { track_id, .. }
            | Self::TrackFailed { track_id, .. } => track_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TitleEvents {
    tx: broadcast::Sender<TitleEvent>,
}

impl Default for TitleEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl TitleEvents {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TitleEvent> {
        self.tx.subscribe()
    }

    /// Send to every current subscriber. Having none is not an error.
    pub fn emit(&self, event: TitleEvent) {
        let _ = self.tx.send(event);
    }

    /// A `DrmEvents` sink that tags everything with `track_id`.
    pub fn for_track(&self, track_id: impl Into<String>) -> TrackEvents {
        TrackEvents {
            bus: self.clone(),
            track_id: track_id.into(),
        }
    }
}

/// The title bus seen from one track.
#[derive(Debug, Clone)]
pub struct TrackEvents {
    bus: TitleEvents,
    track_id: String,
}

impl TrackEvents {
    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn emit(&self, event: TitleEvent) {
        self.bus.emit(event);
    }
}

impl crate::drm::DrmEvents for TrackEvents {
    fn on_pssh_init(&self, scheme: &str, pssh: &str) {
        self.bus.emit(TitleEvent::PsshInit {
            track_id: self.track_id.clone(),
            scheme: scheme.to_string(),
            pssh: pssh.to_string(),
        });
    }

    fn on_key_found(&self, kid: &str, key: &ContentKey, source: &str, is_track_kid: bool) {
        self.bus.emit(TitleEvent::KeyFound {
            track_id: self.track_id.clone(),
            kid: kid.to_string(),
            key: key.clone(),
            source: source.to_string(),
            is_track_kid,
        });
    }

    fn on_error(&self, message: &str) {
        self.bus.emit(TitleEvent::DrmError {
            track_id: self.track_id.clone(),
            message: message.to_string(),
        });
    }
}
