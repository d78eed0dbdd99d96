//! Media track model shared by the key broker, selector and downloader:
//! titles, tracks, DRM descriptors and BCP-47 language matching.

pub mod codec;
pub mod drm;
pub mod error;
pub mod language;
pub mod title;
pub mod track;
pub mod tracks;

pub use codec::{AudioCodec, DynamicRange, SubtitleCodec, VideoCodec};
pub use drm::{
    COMMON_SYSTEM_ID, ContentKey, DrmDescriptor, DrmScheme, PLAYREADY_SYSTEM_ID, Pssh,
    WIDEVINE_SYSTEM_ID, kid_hex, parse_kid, tenc_kid,
};
pub use error::TrackError;
pub use language::{LANGUAGE_MAX_DISTANCE, Language, contains_all, is_close_match};
pub use title::{Title, TitleKind};
pub use track::{Attachment, AudioAttrs, Chapter, SubtitleAttrs, Track, TrackKind, VideoAttrs};
pub use tracks::Tracks;
