#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use key_vaults::{KeyVault, VaultWrite, Vaults};
use media_tracks::{
    AudioAttrs, AudioCodec, ContentKey, DrmDescriptor, DrmScheme, Pssh, SubtitleAttrs,
    SubtitleCodec, Title, TitleKind, Track, VideoAttrs, VideoCodec, WIDEVINE_SYSTEM_ID,
};
use parking_lot::Mutex;
use tessera::downloader::{DownloadError, SegmentCallback, SegmentProgress, TrackDecrypter, TrackDownloader};
use tessera::drm::{Cdm, CdmError, ChallengeHandler, LicenseService};
use uuid::Uuid;

pub const SERVICE: &str = "TEST";

pub fn key(digit: char) -> ContentKey {
    ContentKey::new(digit.to_string().repeat(32)).unwrap()
}

pub fn kid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// An in-process vault.
#[derive(Debug)]
pub struct MemoryVault {
    name: String,
    pub keys: Mutex<BTreeMap<(String, Uuid), ContentKey>>,
    pub writes: AtomicUsize,
}

impl MemoryVault {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            keys: Mutex::new(BTreeMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_key(self, kid: Uuid, key: ContentKey) -> Self {
        self.keys.lock().insert((SERVICE.to_string(), kid), key);
        self
    }

    pub fn get(&self, kid: &Uuid) -> Option<ContentKey> {
        self.keys.lock().get(&(SERVICE.to_string(), *kid)).cloned()
    }
}

#[async_trait]
impl KeyVault for MemoryVault {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_key(&self, kid: &Uuid, service: &str) -> key_vaults::Result<Option<ContentKey>> {
        Ok(self.keys.lock().get(&(service.to_string(), *kid)).cloned())
    }

    async fn add_key(
        &self,
        service: &str,
        kid: &Uuid,
        key: &ContentKey,
    ) -> key_vaults::Result<VaultWrite> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let previous = self
            .keys
            .lock()
            .insert((service.to_string(), *kid), key.clone());
        Ok(VaultWrite::Stored(usize::from(previous.as_ref() != Some(key))))
    }
}

pub fn pool(vaults: &[Arc<MemoryVault>]) -> Arc<Vaults> {
    let vaults = vaults
        .iter()
        .map(|v| v.clone() as Arc<dyn KeyVault>)
        .collect();
    Arc::new(Vaults::new(vaults, SERVICE).unwrap())
}

/// Answers every exchange with a fixed set of keys.
#[derive(Debug, Default)]
pub struct FixedCdm {
    pub keys: BTreeMap<Uuid, ContentKey>,
    pub calls: AtomicUsize,
    pub requested: Mutex<Vec<Vec<Uuid>>>,
}

impl FixedCdm {
    pub fn new(keys: impl IntoIterator<Item = (Uuid, ContentKey)>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Cdm for FixedCdm {
    async fn exchange(
        &self,
        _descriptor: &DrmDescriptor,
        kids: &[Uuid],
        certificate: &dyn ChallengeHandler,
        licence: &dyn ChallengeHandler,
    ) -> Result<BTreeMap<Uuid, ContentKey>, CdmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().push(kids.to_vec());
        certificate.respond(Bytes::from_static(&[0x08, 0x04])).await?;
        licence.respond(Bytes::from_static(b"challenge")).await?;
        Ok(self.keys.clone())
    }
}

/// Echoes licence challenges back and counts the download hooks.
#[derive(Debug, Default)]
pub struct EchoService {
    pub licences: AtomicUsize,
    pub segments: AtomicUsize,
    pub downloaded: AtomicUsize,
    pub decrypted: AtomicUsize,
}

#[async_trait]
impl LicenseService for EchoService {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn license(&self, challenge: Bytes, _title: &Title, _track: &Track) -> Result<Bytes, CdmError> {
        self.licences.fetch_add(1, Ordering::SeqCst);
        Ok(challenge)
    }

    fn on_segment_downloaded(&self, _track: &Track, _segment: &Path) {
        self.segments.fetch_add(1, Ordering::SeqCst);
    }

    fn on_track_downloaded(&self, _track: &Track) {
        self.downloaded.fetch_add(1, Ordering::SeqCst);
    }

    fn on_track_decrypted(&self, _track: &Track, _drm: &DrmDescriptor) {
        self.decrypted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Writes one fixed segment per track, optionally hanging.
#[derive(Debug, Default)]
pub struct FakeDownloader {
    pub calls: AtomicUsize,
    pub hang: bool,
    /// Written instead of the default body.
    pub body: Option<String>,
}

impl FakeDownloader {
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn with_body(body: &str) -> Self {
        Self {
            body: Some(body.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TrackDownloader for FakeDownloader {
    async fn download(
        &self,
        track: &Track,
        output: &Path,
        on_segment: SegmentCallback<'_>,
    ) -> Result<u64, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = self
            .body
            .clone()
            .unwrap_or_else(|| format!("segment of {}", track.id));
        tokio::fs::write(output, &body).await?;
        on_segment(SegmentProgress {
            index: 0,
            total: 1,
            bytes: body.len() as u64,
        });
        Ok(body.len() as u64)
    }
}

/// "Decrypts" by copying the input, or fails after a partial write.
#[derive(Debug, Default)]
pub struct CopyDecrypter {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl CopyDecrypter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TrackDecrypter for CopyDecrypter {
    async fn decrypt(
        &self,
        input: &Path,
        output: &Path,
        _drm: &DrmDescriptor,
    ) -> Result<(), DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            tokio::fs::write(output, b"partial").await?;
            return Err(DownloadError::Process {
                program: "mp4decrypt".into(),
                code: Some(1),
                stderr: "invalid key".into(),
            });
        }
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

pub fn title() -> Title {
    Title::new("t1", SERVICE, "Heat", TitleKind::Movie { year: Some(1995) })
}

pub fn widevine(kids: &[Uuid]) -> DrmDescriptor {
    let pssh = Pssh::with_key_ids(WIDEVINE_SYSTEM_ID, kids.to_vec(), Vec::new());
    DrmDescriptor::new(DrmScheme::Widevine, pssh, kids.iter().copied())
}

pub fn video(id: &str, height: u32) -> Track {
    Track::video(
        id,
        VideoAttrs {
            codec: VideoCodec::Avc,
            range: Default::default(),
            width: Some(height * 16 / 9),
            height: Some(height),
            fps: None,
        },
        "en".parse().unwrap(),
    )
}

pub fn audio(id: &str, lang: &str) -> Track {
    Track::audio(
        id,
        AudioAttrs {
            codec: AudioCodec::Aac,
            channels: Some(2.0),
            descriptive: false,
        },
        lang.parse().unwrap(),
    )
}

pub fn subtitle(id: &str, lang: &str, sdh: bool, strip_sdh: bool) -> Track {
    Track::subtitle(
        id,
        SubtitleAttrs {
            codec: SubtitleCodec::WebVtt,
            forced: false,
            sdh,
            cc: false,
            strip_sdh,
        },
        lang.parse().unwrap(),
    )
}
