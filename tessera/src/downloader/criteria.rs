//! User preferences driving track selection.

use media_tracks::{AudioCodec, DynamicRange, Language, VideoCodec};
use serde::{Deserialize, Serialize};

/// Selection preferences, usually read from the `[selection]` config table
/// and overridden per run from the command line.
///
/// Empty lists and `None` mean "no preference". Requested bounds never match
/// a track that lacks the attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionCriteria {
    /// Requested vertical resolutions, in preference order.
    pub quality: Vec<u32>,
    pub video_codec: Option<VideoCodec>,
    pub audio_codec: Option<AudioCodec>,
    /// Exact video bitrate in kb/s.
    pub video_bitrate_kbps: Option<u64>,
    /// Exact audio bitrate in kb/s.
    pub audio_bitrate_kbps: Option<u64>,
    pub range: Vec<DynamicRange>,
    /// Channel count, e.g. `5.1`. Compared after rounding up.
    pub channels: Option<f32>,
    /// Language for video and audio, and for forced subtitles.
    pub lang: Vec<Language>,
    /// Overrides `lang` for video when non-empty.
    pub video_lang: Vec<Language>,
    pub subtitle_lang: Vec<Language>,
    /// Add a stripped copy of SDH subtitles that have no plain counterpart.
    pub add_sdh_stripped: bool,
    pub video_only: bool,
    pub audio_only: bool,
    pub subtitles_only: bool,
    pub chapters_only: bool,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            quality: Vec::new(),
            video_codec: None,
            audio_codec: None,
            video_bitrate_kbps: None,
            audio_bitrate_kbps: None,
            range: vec![DynamicRange::Sdr],
            channels: None,
            lang: vec![english()],
            video_lang: Vec::new(),
            subtitle_lang: vec![Language::all()],
            add_sdh_stripped: true,
            video_only: false,
            audio_only: false,
            subtitles_only: false,
            chapters_only: false,
        }
    }
}

impl SelectionCriteria {
    /// Whether any of the only-flags narrows the result to specific kinds.
    pub fn has_only_flag(&self) -> bool {
        self.video_only || self.audio_only || self.subtitles_only || self.chapters_only
    }

    /// Languages applied to video: the override if set, else `lang`.
    pub fn effective_video_lang(&self) -> &[Language] {
        if self.video_lang.is_empty() {
            &self.lang
        } else {
            &self.video_lang
        }
    }
}

fn english() -> Language {
    Language::from_primary("en")
}
