//! Track selection.
//!
//! Narrows a title's tracks down to what the user asked for. Passes run in a
//! fixed order, each on what the previous one left:
//!
//! 1. video codec, range and bitrate
//! 2. video language
//! 3. resolution and range pairs
//! 4. subtitle language and forced subtitles
//! 5. audio
//! 6. only-flags
//!
//! Passes 1 to 4 only apply to movies and episodes.

use std::collections::HashSet;

use itertools::iproduct;
use media_tracks::{
    DynamicRange, Language, Title, Track, Tracks, contains_all, is_close_match,
};
use tracing::debug;

use super::criteria::SelectionCriteria;

/// Applies a [`SelectionCriteria`] to titles.
#[derive(Debug, Clone, Default)]
pub struct TrackSelector {
    criteria: SelectionCriteria,
}

impl TrackSelector {
    pub fn new(criteria: SelectionCriteria) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &SelectionCriteria {
        &self.criteria
    }

    /// Select tracks from `title` without modifying it.
    pub fn select(&self, title: &Title) -> Tracks {
        let c = &self.criteria;
        let mut tracks = title.tracks.clone();

        tracks.sort_videos(c.effective_video_lang());
        tracks.sort_audio(&c.lang);
        tracks.sort_subtitles(&c.subtitle_lang);
        if c.add_sdh_stripped {
            tracks.add_sdh_stripped_companions();
        }

        if title.is_video() {
            self.filter_video(&mut tracks);
            self.filter_subtitles(&mut tracks);
        }
        if !tracks.audio.is_empty() {
            self.filter_audio(&mut tracks);
        }

        if !c.has_only_flag() {
            return tracks;
        }

        let mut kept = Tracks::new();
        if c.video_only {
            kept.videos = std::mem::take(&mut tracks.videos);
        }
        if c.audio_only {
            kept.audio = std::mem::take(&mut tracks.audio);
        }
        if c.subtitles_only {
            kept.subtitles = std::mem::take(&mut tracks.subtitles);
        }
        if c.chapters_only {
            // Chapters are never filtered.
            kept.chapters = title.tracks.chapters.clone();
        }
        kept
    }

    fn filter_video(&self, tracks: &mut Tracks) {
        let c = &self.criteria;

        if let Some(codec) = c.video_codec {
            tracks.select_video(|t| t.as_video().is_some_and(|v| v.codec == codec));
        }
        if !c.range.is_empty() {
            tracks.select_video(|t| t.as_video().is_some_and(|v| c.range.contains(&v.range)));
        }
        if let Some(kbps) = c.video_bitrate_kbps {
            tracks.select_video(|t| t.kbps() == Some(kbps));
        }

        let languages = c.effective_video_lang();
        if !is_unrestricted(languages) {
            tracks.videos = Tracks::by_language(&tracks.videos, languages, 0);
        }

        if !c.quality.is_empty() {
            let candidates = tracks.videos.clone();
            tracks.by_resolutions(&c.quality, 0);
            if tracks.videos.is_empty() {
                tracks.videos = candidates;
            }
        }

        let qualities: Vec<Option<u32>> = if c.quality.is_empty() {
            vec![None]
        } else {
            c.quality.iter().copied().map(Some).collect()
        };
        let ranges: Vec<Option<DynamicRange>> = if c.range.is_empty() {
            vec![None]
        } else {
            c.range.iter().copied().map(Some).collect()
        };

        let mut selected: Vec<Track> = Vec::new();
        for (quality, range) in iproduct!(qualities, ranges) {
            let found = tracks
                .videos
                .iter()
                .find(|t| matches_resolution(t, quality) && matches_range(t, range));
            if let Some(track) = found
                && !selected.iter().any(|s| s.id == track.id)
            {
                selected.push(track.clone());
            }
        }

        if selected.is_empty() {
            debug!(
                quality = ?c.quality,
                range = ?c.range,
                "No video matches the requested quality and range, keeping all candidates"
            );
        } else {
            tracks.videos = selected;
        }
    }

    fn filter_subtitles(&self, tracks: &mut Tracks) {
        let c = &self.criteria;

        if !is_unrestricted(&c.subtitle_lang) {
            tracks.subtitles = Tracks::by_language(&tracks.subtitles, &c.subtitle_lang, 0);
            dedup_by_id(&mut tracks.subtitles);
        }
        tracks.select_subtitles(|t| {
            !t.as_subtitle().is_some_and(|s| s.forced) || is_close_match(&t.language, &c.lang)
        });
    }

    fn filter_audio(&self, tracks: &mut Tracks) {
        let c = &self.criteria;

        tracks.select_audio(|t| !t.as_audio().is_some_and(|a| a.descriptive));
        if let Some(codec) = c.audio_codec {
            tracks.select_audio(|t| t.as_audio().is_some_and(|a| a.codec == codec));
        }
        if let Some(kbps) = c.audio_bitrate_kbps {
            tracks.select_audio(|t| t.kbps() == Some(kbps));
        }
        if let Some(target) = c.channels {
            tracks.select_audio(|t| {
                t.as_audio()
                    .and_then(|a| a.channels)
                    .is_some_and(|channels| channels_match(channels, target))
            });
        }
        if !is_unrestricted(&c.lang) {
            tracks.audio = Tracks::by_language(&tracks.audio, &c.lang, 1);
            dedup_by_id(&mut tracks.audio);
        }
    }
}

/// Channel layouts match when both round up to the same whole count, so
/// `5.1` matches `6.0`.
pub fn channels_match(channels: f32, target: f32) -> bool {
    channels.ceil() == target.ceil()
}

fn matches_resolution(track: &Track, quality: Option<u32>) -> bool {
    match quality {
        None => true,
        Some(resolution) => track.has_height(resolution) || track.fits_canvas(resolution),
    }
}

fn matches_range(track: &Track, range: Option<DynamicRange>) -> bool {
    match range {
        None => true,
        Some(range) => track.as_video().is_some_and(|v| v.range == range),
    }
}

/// Requests like `["en", "en-US"]` can pick the same track twice.
fn dedup_by_id(tracks: &mut Vec<Track>) {
    let mut seen = HashSet::new();
    tracks.retain(|t| seen.insert(t.id.clone()));
}

/// No languages, or the `all` sentinel, means no language filtering.
fn is_unrestricted(languages: &[Language]) -> bool {
    languages.is_empty() || contains_all(languages)
}
