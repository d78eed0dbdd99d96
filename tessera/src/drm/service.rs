use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use media_tracks::{DrmDescriptor, Title, Track};

use super::error::CdmError;

/// The streaming service a title comes from, as seen by the key broker and
/// the download orchestrator.
#[async_trait]
pub trait LicenseService: Send + Sync {
    /// Service tag; also the vault namespace for its keys.
    fn name(&self) -> &str;

    /// Answer the service certificate challenge. The default answers with no
    /// certificate, which disables privacy mode.
    async fn license_certificate(
        &self,
        _challenge: Bytes,
        _title: &Title,
        _track: &Track,
    ) -> Result<Bytes, CdmError> {
        Ok(Bytes::new())
    }

    /// Exchange a licence challenge for a licence.
    async fn license(&self, challenge: Bytes, title: &Title, track: &Track) -> Result<Bytes, CdmError>;

    fn on_segment_downloaded(&self, _track: &Track, _segment: &Path) {}

    fn on_track_downloaded(&self, _track: &Track) {}

    fn on_track_decrypted(&self, _track: &Track, _drm: &DrmDescriptor) {}
}
