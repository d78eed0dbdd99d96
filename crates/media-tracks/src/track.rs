//! Individual tracks: video, audio and subtitle streams plus chapters and attachments.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::codec::{AudioCodec, DynamicRange, SubtitleCodec, VideoCodec};
use crate::drm::DrmDescriptor;
use crate::language::Language;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAttrs {
    pub codec: VideoCodec,
    #[serde(default)]
    pub range: DynamicRange,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioAttrs {
    pub codec: AudioCodec,
    /// Channel layout as a decimal count, e.g. `5.1` or `2.0`.
    pub channels: Option<f32>,
    /// Audio description for the visually impaired.
    #[serde(default)]
    pub descriptive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleAttrs {
    pub codec: SubtitleCodec,
    #[serde(default)]
    pub forced: bool,
    /// Subtitles for the deaf and hard of hearing.
    #[serde(default)]
    pub sdh: bool,
    /// Closed captions.
    #[serde(default)]
    pub cc: bool,
    /// Set on companions created from an SDH track; hearing-impaired cues are
    /// stripped after download.
    #[serde(default)]
    pub strip_sdh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TrackKind {
    Video(VideoAttrs),
    Audio(AudioAttrs),
    Subtitle(SubtitleAttrs),
}

/// A downloadable media stream belonging to a title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Stable identifier; must not change between requests for the same content.
    pub id: String,
    pub kind: TrackKind,
    /// Bits per second.
    pub bitrate: Option<u64>,
    pub language: Language,
    #[serde(default)]
    pub is_original_lang: bool,
    /// Segment URLs in playback order. Progressive files have exactly one.
    #[serde(default)]
    pub urls: Vec<Url>,
    #[serde(default)]
    pub drm: Vec<DrmDescriptor>,
    /// Key id of this track's own content, as read from the init segment's
    /// `tenc` box or reported by the service. A PSSH may list the KIDs of
    /// several tracks.
    #[serde(default)]
    pub kid: Option<Uuid>,
    /// Local file once downloaded.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Track {
    pub fn new(id: impl Into<String>, kind: TrackKind, language: Language) -> Self {
        Self {
            id: id.into(),
            kind,
            bitrate: None,
            language,
            is_original_lang: false,
            urls: Vec::new(),
            drm: Vec::new(),
            kid: None,
            path: None,
        }
    }

    pub fn video(id: impl Into<String>, attrs: VideoAttrs, language: Language) -> Self {
        Self::new(id, TrackKind::Video(attrs), language)
    }

    pub fn audio(id: impl Into<String>, attrs: AudioAttrs, language: Language) -> Self {
        Self::new(id, TrackKind::Audio(attrs), language)
    }

    pub fn subtitle(id: impl Into<String>, attrs: SubtitleAttrs, language: Language) -> Self {
        Self::new(id, TrackKind::Subtitle(attrs), language)
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn with_urls(mut self, urls: Vec<Url>) -> Self {
        self.urls = urls;
        self
    }

    pub fn with_drm(mut self, descriptor: DrmDescriptor) -> Self {
        self.drm.push(descriptor);
        self
    }

    pub fn with_kid(mut self, kid: Uuid) -> Self {
        self.kid = Some(kid);
        self
    }

    pub fn original_lang(mut self, is_original: bool) -> Self {
        self.is_original_lang = is_original;
        self
    }

    pub fn as_video(&self) -> Option<&VideoAttrs> {
        match &self.kind {
            TrackKind::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioAttrs> {
        match &self.kind {
            TrackKind::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_subtitle(&self) -> Option<&SubtitleAttrs> {
        match &self.kind {
            TrackKind::Subtitle(s) => Some(s),
            _ => None,
        }
    }

    /// Bitrate in whole kb/s, truncated.
    pub fn kbps(&self) -> Option<u64> {
        self.bitrate.map(|b| b / 1000)
    }

    /// The descriptor used for decryption. When a track carries more than one,
    /// the last one wins.
    pub fn drm_descriptor(&self) -> Option<&DrmDescriptor> {
        self.drm.last()
    }

    pub fn drm_descriptor_mut(&mut self) -> Option<&mut DrmDescriptor> {
        self.drm.last_mut()
    }

    /// The key id this track's own content is encrypted with. Falls back to
    /// the descriptor's first KID when the track's own KID is unknown.
    pub fn primary_kid(&self) -> Option<Uuid> {
        self.kid
            .or_else(|| self.drm_descriptor().and_then(|d| d.kids.first().copied()))
    }

    pub fn is_encrypted(&self) -> bool {
        !self.drm.is_empty()
    }

    /// File extension for the downloaded (pre-mux) file.
    pub fn extension(&self) -> &'static str {
        match &self.kind {
            TrackKind::Video(_) => "mp4",
            TrackKind::Audio(_) => "m4a",
            TrackKind::Subtitle(s) => s.codec.extension(),
        }
    }

    /// Whether the video matches a vertical resolution exactly.
    pub fn has_height(&self, resolution: u32) -> bool {
        self.as_video().and_then(|v| v.height) == Some(resolution)
    }

    /// Whether the video's width, placed on a 16:9 canvas, gives `resolution`.
    pub fn fits_canvas(&self, resolution: u32) -> bool {
        self.as_video()
            .and_then(|v| v.width)
            .is_some_and(|w| (u64::from(w) * 9 / 16) as u32 == resolution)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TrackKind::Video(v) => {
                write!(f, "VID | [{}, {}] | {}", v.codec, v.range, self.language)?;
                let mut details = Vec::new();
                if let (Some(w), Some(h)) = (v.width, v.height) {
                    details.push(format!("{w}x{h}"));
                }
                if let Some(kbps) = self.kbps() {
                    details.push(format!("{kbps} kb/s"));
                }
                if let Some(fps) = v.fps {
                    details.push(format!("{fps:.3} FPS"));
                }
                if !details.is_empty() {
                    write!(f, " | {}", details.join(", "))?;
                }
            }
            TrackKind::Audio(a) => {
                write!(f, "AUD | [{}] | {}", a.codec, self.language)?;
                let mut details = Vec::new();
                if let Some(channels) = a.channels {
                    details.push(format!("{channels:.1}"));
                }
                if let Some(kbps) = self.kbps() {
                    details.push(format!("{kbps} kb/s"));
                }
                if !details.is_empty() {
                    write!(f, " | {}", details.join(", "))?;
                }
                if a.descriptive {
                    f.write_str(" | Descriptive")?;
                }
            }
            TrackKind::Subtitle(s) => {
                write!(f, "SUB | [{}] | {}", s.codec, self.language)?;
                let flags: Vec<&str> = [(s.forced, "Forced"), (s.sdh, "SDH"), (s.cc, "CC")]
                    .into_iter()
                    .filter_map(|(set, label)| set.then_some(label))
                    .collect();
                if !flags.is_empty() {
                    write!(f, " | {}", flags.join(", "))?;
                }
            }
        }
        write!(f, " | {}", self.id)
    }
}

/// A named point in the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub timestamp: Duration,
    pub name: Option<String>,
}

impl Chapter {
    pub fn new(timestamp: Duration, name: Option<String>) -> Self {
        Self { timestamp, name }
    }
}

impl fmt::Display for Chapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.timestamp.as_millis();
        let (hours, rem) = (total / 3_600_000, total % 3_600_000);
        let (minutes, rem) = (rem / 60_000, rem % 60_000);
        let (seconds, millis) = (rem / 1000, rem % 1000);
        write!(f, "CHP | {hours:02}:{minutes:02}:{seconds:02}.{millis:03}")?;
        if let Some(name) = &self.name {
            write!(f, " | {name}")?;
        }
        Ok(())
    }
}

/// An arbitrary file (fonts, cover art) muxed alongside the tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub description: Option<String>,
    pub path: PathBuf,
}
