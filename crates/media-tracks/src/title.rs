use std::fmt;

use serde::{Deserialize, Serialize};

use crate::language::Language;
use crate::tracks::Tracks;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TitleKind {
    Movie {
        year: Option<u16>,
    },
    Episode {
        show: String,
        season: u32,
        number: u32,
    },
    Song {
        artist: String,
        album: Option<String>,
    },
}

/// A requested media item and its tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Title {
    pub id: String,
    /// Tag of the service the title belongs to; used as the vault namespace.
    pub service: String,
    pub name: String,
    pub kind: TitleKind,
    /// Original language, when the service reports one.
    pub language: Option<Language>,
    #[serde(default)]
    pub tracks: Tracks,
}

impl Title {
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        name: impl Into<String>,
        kind: TitleKind,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            name: name.into(),
            kind,
            language: None,
            tracks: Tracks::default(),
        }
    }

    pub fn with_tracks(mut self, tracks: Tracks) -> Self {
        self.tracks = tracks;
        self
    }

    /// Movies and episodes carry video; songs do not.
    pub fn is_video(&self) -> bool {
        matches!(self.kind, TitleKind::Movie { .. } | TitleKind::Episode { .. })
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TitleKind::Movie { year: Some(year) } => write!(f, "{} ({year})", self.name),
            TitleKind::Movie { year: None } => f.write_str(&self.name),
            TitleKind::Episode {
                show,
                season,
                number,
            } => {
                write!(f, "{show} S{season:02}E{number:02}")?;
                if !self.name.is_empty() {
                    write!(f, " {}", self.name)?;
                }
                Ok(())
            }
            TitleKind::Song { artist, .. } => write!(f, "{artist} - {}", self.name),
        }
    }
}
