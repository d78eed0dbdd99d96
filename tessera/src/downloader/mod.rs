//! Track selection and download.
//!
//! [`TrackSelector`] narrows a title down to the tracks the user asked for,
//! [`DownloadOrchestrator`] then fetches and decrypts them concurrently,
//! resolving keys through the [`KeyBroker`](crate::drm::KeyBroker).

mod criteria;
mod decrypt;
mod error;
mod http;
mod orchestrator;
mod subtitle;
mod track_selector;

pub use criteria::SelectionCriteria;
pub use decrypt::{ProcessDecrypter, TrackDecrypter};
pub use error::DownloadError;
pub use http::{HttpSegmentDownloader, SegmentCallback, SegmentProgress, TrackDownloader};
pub use orchestrator::{DownloadConfig, DownloadOrchestrator, DownloadSummary};
pub use subtitle::{strip_sdh_cues, strip_sdh_file};
pub use track_selector::{TrackSelector, channels_match};
