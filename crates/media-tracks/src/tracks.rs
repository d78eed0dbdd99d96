//! The per-title track collection.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TrackError;
use crate::language::{Language, is_close_match};
use crate::track::{Attachment, Chapter, Track, TrackKind};

/// Tracks of a title, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tracks {
    pub videos: Vec<Track>,
    pub audio: Vec<Track>,
    pub subtitles: Vec<Track>,
    pub chapters: Vec<Chapter>,
    pub attachments: Vec<Attachment>,
}

impl Tracks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a track to the collection for its kind.
    ///
    /// Track ids must be unique. With `warn_only` a duplicate is skipped and
    /// `Ok(false)` returned, otherwise it is an error.
    pub fn add(&mut self, track: Track, warn_only: bool) -> Result<bool, TrackError> {
        if self.exists(&track.id) {
            if warn_only {
                return Ok(false);
            }
            return Err(TrackError::DuplicateTrack(track.id));
        }

        match track.kind {
            TrackKind::Video(_) => self.videos.push(track),
            TrackKind::Audio(_) => self.audio.push(track),
            TrackKind::Subtitle(_) => self.subtitles.push(track),
        }
        Ok(true)
    }

    /// Add many tracks, returning how many were added.
    pub fn add_all(
        &mut self,
        tracks: impl IntoIterator<Item = Track>,
        warn_only: bool,
    ) -> Result<usize, TrackError> {
        let mut added = 0;
        let mut duplicates = 0;
        for track in tracks {
            if self.add(track, warn_only)? {
                added += 1;
            } else {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            warn!(duplicates, "Found and skipped duplicate tracks");
        }
        Ok(added)
    }

    /// Merge another collection into this one, including chapters and attachments.
    pub fn extend(&mut self, other: Tracks, warn_only: bool) -> Result<usize, TrackError> {
        let Tracks {
            videos,
            audio,
            subtitles,
            chapters,
            attachments,
        } = other;
        let added = self.add_all(
            videos.into_iter().chain(audio).chain(subtitles),
            warn_only,
        )?;
        for chapter in chapters {
            self.add_chapter(chapter);
        }
        self.attachments.extend(attachments);
        Ok(added)
    }

    /// Chapters are kept ordered by timestamp; one chapter per timestamp.
    pub fn add_chapter(&mut self, chapter: Chapter) {
        match self
            .chapters
            .binary_search_by_key(&chapter.timestamp, |c| c.timestamp)
        {
            Ok(pos) => self.chapters[pos] = chapter,
            Err(pos) => self.chapters.insert(pos, chapter),
        }
    }

    pub fn add_attachment(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    pub fn exists(&self, id: &str) -> bool {
        self.iter().any(|t| t.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Track> {
        self.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Track> {
        self.iter_mut().find(|t| t.id == id)
    }

    /// Videos, then audio, then subtitles.
    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.videos
            .iter()
            .chain(self.audio.iter())
            .chain(self.subtitles.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.videos
            .iter_mut()
            .chain(self.audio.iter_mut())
            .chain(self.subtitles.iter_mut())
    }

    /// Number of media tracks (chapters and attachments excluded).
    pub fn len(&self) -> usize {
        self.videos.len() + self.audio.len() + self.subtitles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the media tracks out, leaving chapters and attachments in place.
    pub fn take_tracks(&mut self) -> Vec<Track> {
        let mut tracks = std::mem::take(&mut self.videos);
        tracks.append(&mut self.audio);
        tracks.append(&mut self.subtitles);
        tracks
    }

    pub fn select_video(&mut self, keep: impl FnMut(&Track) -> bool) {
        retain(&mut self.videos, keep);
    }

    pub fn select_audio(&mut self, keep: impl FnMut(&Track) -> bool) {
        retain(&mut self.audio, keep);
    }

    pub fn select_subtitles(&mut self, keep: impl FnMut(&Track) -> bool) {
        retain(&mut self.subtitles, keep);
    }

    /// Keep the videos matching any of `resolutions`, in request order.
    ///
    /// Exact height matches are preferred; only if a resolution has none is
    /// the width placed on a 16:9 canvas considered instead. `per_resolution`
    /// caps each resolution's matches (0 for no cap).
    pub fn by_resolutions(&mut self, resolutions: &[u32], per_resolution: usize) {
        let mut selected: Vec<Track> = Vec::new();
        for &resolution in resolutions {
            let mut matches: Vec<&Track> = self
                .videos
                .iter()
                .filter(|t| t.has_height(resolution))
                .collect();
            if matches.is_empty() {
                matches = self
                    .videos
                    .iter()
                    .filter(|t| t.fits_canvas(resolution))
                    .collect();
            }
            let take = if per_resolution == 0 {
                matches.len()
            } else {
                per_resolution
            };
            selected.extend(matches.into_iter().take(take).cloned());
        }
        self.videos = selected;
    }

    /// Tracks close to each requested language, in language order, at most
    /// `per_language` per language (0 for no cap).
    pub fn by_language(tracks: &[Track], languages: &[Language], per_language: usize) -> Vec<Track> {
        let mut selected = Vec::new();
        for language in languages {
            let matches = tracks
                .iter()
                .filter(|t| is_close_match(&t.language, std::slice::from_ref(language)));
            if per_language == 0 {
                selected.extend(matches.cloned());
            } else {
                selected.extend(matches.take(per_language).cloned());
            }
        }
        selected
    }

    /// Sort videos by bitrate (highest first), then group by the given languages.
    pub fn sort_videos(&mut self, by_language: &[Language]) {
        sort_by_bitrate(&mut self.videos);
        group_by_languages(&mut self.videos, by_language);
    }

    /// Sort audio by bitrate, move descriptive audio last, then group by language.
    pub fn sort_audio(&mut self, by_language: &[Language]) {
        sort_by_bitrate(&mut self.audio);
        self.audio.sort_by_cached_key(|t| {
            if t.as_audio().is_some_and(|a| a.descriptive) {
                t.language.to_string()
            } else {
                String::new()
            }
        });
        group_by_languages(&mut self.audio, by_language);
    }

    /// Sort subtitles forced → normal → SDH/CC within alphabetical language
    /// order, then move the requested languages to the top.
    pub fn sort_subtitles(&mut self, by_language: &[Language]) {
        if self.subtitles.is_empty() {
            return;
        }
        self.subtitles.sort_by_cached_key(|t| t.language.to_string());
        self.subtitles
            .sort_by_key(|t| t.as_subtitle().is_some_and(|s| s.sdh || s.cc));
        self.subtitles
            .sort_by_key(|t| !t.as_subtitle().is_some_and(|s| s.forced));
        for language in by_language.iter().rev() {
            let Some(language) = resolve_language(&self.subtitles, language) else {
                continue;
            };
            self.subtitles
                .sort_by_key(|t| !is_close_match(&language, std::slice::from_ref(&t.language)));
        }
    }

    /// For every SDH subtitle without a plain counterpart in a closely
    /// matching language, add a companion flagged for hearing-impaired cue
    /// stripping. Closed captions count as plain.
    ///
    /// Returns the number of companions added.
    pub fn add_sdh_stripped_companions(&mut self) -> usize {
        let mut companions = Vec::new();
        for track in &self.subtitles {
            let Some(attrs) = track.as_subtitle() else {
                continue;
            };
            if !attrs.sdh || attrs.strip_sdh {
                continue;
            }
            let has_plain = self.subtitles.iter().any(|other| {
                other.as_subtitle().is_some_and(|o| !o.sdh && !o.forced)
                    && is_close_match(&track.language, std::slice::from_ref(&other.language))
            });
            if has_plain {
                continue;
            }

            let mut companion = track.clone();
            companion.id = format!("{}_stripped", track.id);
            if let TrackKind::Subtitle(attrs) = &mut companion.kind {
                attrs.sdh = false;
                attrs.strip_sdh = true;
            }
            companions.push(companion);
        }

        let count = companions.len();
        for companion in companions {
            if !self.exists(&companion.id) {
                self.subtitles.push(companion);
            }
        }
        count
    }
}

fn retain(tracks: &mut Vec<Track>, mut keep: impl FnMut(&Track) -> bool) {
    tracks.retain(|t| keep(t));
}

fn sort_by_bitrate(tracks: &mut [Track]) {
    tracks.sort_by_key(|t| std::cmp::Reverse(t.bitrate.unwrap_or(0)));
}

/// `all` resolves to the title's original language, if any track declares one.
fn resolve_language(tracks: &[Track], language: &Language) -> Option<Language> {
    if language.is_all() {
        tracks
            .iter()
            .find(|t| t.is_original_lang)
            .map(|t| t.language.clone())
    } else {
        Some(language.clone())
    }
}

fn group_by_languages(tracks: &mut [Track], by_language: &[Language]) {
    for language in by_language.iter().rev() {
        let Some(language) = resolve_language(tracks, language) else {
            continue;
        };
        tracks.sort_by_cached_key(|t| t.language.to_string());
        tracks.sort_by_key(|t| !is_close_match(&language, std::slice::from_ref(&t.language)));
    }
}
