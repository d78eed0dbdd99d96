//! Codec and dynamic-range identifiers.
//!
//! Parsing accepts the common aliases found in manifests and on the command
//! line (`H.264`, `avc1`, `E-AC-3`, ...). Display uses the short canonical name.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, EnumIter, EnumString};

use crate::error::TrackError;

macro_rules! serde_via_str {
    ($ty:ty, $kind:literal) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                value.parse().map_err(|_| {
                    serde::de::Error::custom(TrackError::UnknownVariant {
                        kind: $kind,
                        value,
                    })
                })
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum VideoCodec {
    #[strum(to_string = "AVC", serialize = "H.264", serialize = "H264", serialize = "avc1")]
    Avc,
    #[strum(
        to_string = "HEVC",
        serialize = "H.265",
        serialize = "H265",
        serialize = "hvc1",
        serialize = "hev1"
    )]
    Hevc,
    #[strum(to_string = "VC1", serialize = "VC-1", serialize = "wvc1")]
    Vc1,
    #[strum(to_string = "VP8", serialize = "vp08")]
    Vp8,
    #[strum(to_string = "VP9", serialize = "vp09")]
    Vp9,
    #[strum(to_string = "AV1", serialize = "av01")]
    Av1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum AudioCodec {
    #[strum(to_string = "AAC", serialize = "mp4a")]
    Aac,
    #[strum(to_string = "DD", serialize = "AC-3", serialize = "AC3", serialize = "ac-3")]
    Ac3,
    #[strum(
        to_string = "DD+",
        serialize = "DDP",
        serialize = "E-AC-3",
        serialize = "EC3",
        serialize = "ec-3"
    )]
    Ec3,
    #[strum(to_string = "AC4", serialize = "AC-4", serialize = "ac-4")]
    Ac4,
    #[strum(to_string = "OPUS")]
    Opus,
    #[strum(to_string = "VORB", serialize = "Vorbis", serialize = "OGG")]
    Vorbis,
    #[strum(to_string = "DTS")]
    Dts,
    #[strum(to_string = "ALAC")]
    Alac,
    #[strum(to_string = "FLAC")]
    Flac,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum SubtitleCodec {
    #[strum(to_string = "SRT", serialize = "SubRip")]
    SubRip,
    #[strum(to_string = "SSA")]
    SubStationAlpha,
    #[strum(to_string = "ASS")]
    AdvancedSubStationAlpha,
    #[strum(to_string = "TTML", serialize = "DFXP")]
    TimedTextMarkupLang,
    #[strum(to_string = "VTT", serialize = "WebVTT")]
    WebVtt,
    #[strum(to_string = "STPP")]
    FragmentedTtml,
    #[strum(to_string = "WVTT")]
    FragmentedVtt,
}

impl SubtitleCodec {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::SubRip => "srt",
            Self::SubStationAlpha => "ssa",
            Self::AdvancedSubStationAlpha => "ass",
            Self::TimedTextMarkupLang => "ttml",
            Self::WebVtt => "vtt",
            Self::FragmentedTtml | Self::FragmentedVtt => "mp4",
        }
    }
}

/// Video colour/dynamic range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum DynamicRange {
    #[default]
    #[strum(to_string = "SDR")]
    Sdr,
    #[strum(to_string = "HLG")]
    Hlg,
    #[strum(to_string = "HDR10", serialize = "HDR")]
    Hdr10,
    #[strum(to_string = "HDR10+", serialize = "HDR10P")]
    Hdr10Plus,
    #[strum(to_string = "DV", serialize = "Dolby Vision", serialize = "DOVI")]
    DolbyVision,
}

serde_via_str!(VideoCodec, "video codec");
serde_via_str!(AudioCodec, "audio codec");
serde_via_str!(SubtitleCodec, "subtitle codec");
serde_via_str!(DynamicRange, "dynamic range");
