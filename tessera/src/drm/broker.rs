//! Key resolution for a single track.
//!
//! Keys come from the vault pool first and from one licence exchange with the
//! CDM otherwise. Keys found in one vault are copied to the others, and keys
//! obtained from the CDM are written to every vault so the next run never
//! needs the CDM for them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use key_vaults::Vaults;
use media_tracks::{ContentKey, DrmDescriptor, Title, Track, kid_hex};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info};
use uuid::Uuid;

use super::cdm::{ChallengeHandler, Cdm};
use super::error::{CdmError, DrmError};
use super::events::DrmEvents;
use super::export::KeyExport;
use super::service::LicenseService;

/// Where the broker is allowed to look for keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum KeyMode {
    /// Vaults first, then the CDM.
    #[default]
    Any,
    /// Never consult the vaults.
    CdmOnly,
    /// Never contact the CDM.
    VaultsOnly,
}

/// Progress through one descriptor's resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolveState {
    Init,
    PsshAnnounced,
    /// Working through the descriptor's key ids; `next` indexes `kids`.
    PerKeyLoop { next: usize },
    Done,
}

/// Which licence endpoint a challenge is sent to.
#[derive(Debug, Clone, Copy)]
enum ChallengeKind {
    Certificate,
    Licence,
}

/// Binds a service licence endpoint to the title and track being resolved.
struct LicenceCall<'a> {
    service: &'a dyn LicenseService,
    title: &'a Title,
    track: &'a Track,
    kind: ChallengeKind,
}

#[async_trait]
impl ChallengeHandler for LicenceCall<'_> {
    async fn respond(&self, challenge: Bytes) -> Result<Bytes, CdmError> {
        match self.kind {
            ChallengeKind::Certificate => {
                self.service
                    .license_certificate(challenge, self.title, self.track)
                    .await
            }
            ChallengeKind::Licence => self.service.license(challenge, self.title, self.track).await,
        }
    }
}

pub struct KeyBroker {
    cdm: Option<Arc<dyn Cdm>>,
    vaults: Arc<Vaults>,
    mode: KeyMode,
    service: Arc<dyn LicenseService>,
    export: Option<Arc<KeyExport>>,
}

impl KeyBroker {
    pub fn new(
        cdm: Option<Arc<dyn Cdm>>,
        vaults: Arc<Vaults>,
        mode: KeyMode,
        service: Arc<dyn LicenseService>,
        export: Option<Arc<KeyExport>>,
    ) -> Self {
        Self {
            cdm,
            vaults,
            mode,
            service,
            export,
        }
    }

    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    pub fn vaults(&self) -> &Arc<Vaults> {
        &self.vaults
    }

    pub fn service(&self) -> &Arc<dyn LicenseService> {
        &self.service
    }

    /// Resolve the keys of `track`'s DRM descriptor in place.
    ///
    /// `track_kid` is the key id the track's own content is encrypted with; if
    /// it is still unresolved once every source was tried, resolution fails.
    /// Returns `None` for tracks without DRM. Descriptors that do not need a
    /// CDM are returned untouched.
    pub async fn prepare_keys(
        &self,
        title: &Title,
        track: &mut Track,
        track_kid: Option<Uuid>,
        events: &dyn DrmEvents,
    ) -> Result<Option<DrmDescriptor>, DrmError> {
        let Some(mut drm) = track.drm_descriptor().cloned() else {
            return Ok(None);
        };
        if !drm.scheme.requires_cdm() {
            return Ok(Some(drm));
        }

        let result = self
            .resolve(title, track, &mut drm, track_kid, events)
            .await;

        // Keep whatever was found, even on failure.
        if let Some(slot) = track.drm_descriptor_mut() {
            *slot = drm.clone();
        }
        result?;

        if let Some(export) = &self.export
            && drm.resolved_keys().next().is_some()
        {
            export
                .merge(&title.to_string(), &track.to_string(), drm.resolved_keys())
                .await?;
        }

        Ok(Some(drm))
    }

    async fn resolve(
        &self,
        title: &Title,
        track: &Track,
        drm: &mut DrmDescriptor,
        track_kid: Option<Uuid>,
        events: &dyn DrmEvents,
    ) -> Result<(), DrmError> {
        let mut state = ResolveState::Init;
        let mut exchanged = false;

        loop {
            state = match state {
                ResolveState::Init => {
                    events.on_pssh_init(&drm.scheme.to_string(), &drm.pssh.dumps());
                    ResolveState::PsshAnnounced
                }
                ResolveState::PsshAnnounced => ResolveState::PerKeyLoop { next: 0 },
                // A single exchange resolves the whole descriptor.
                ResolveState::PerKeyLoop { .. } if exchanged => ResolveState::Done,
                ResolveState::PerKeyLoop { next } if next >= drm.kids.len() => ResolveState::Done,
                ResolveState::PerKeyLoop { next } => {
                    let kid = drm.kids[next];
                    if !drm.has_key(&kid) {
                        exchanged = self
                            .resolve_kid(title, track, drm, kid, track_kid, events)
                            .await?;
                    }
                    ResolveState::PerKeyLoop { next: next + 1 }
                }
                ResolveState::Done => break,
            };
        }

        if let Some(kid) = track_kid
            && !drm.has_key(&kid)
        {
            let msg = format!("No Content Key for KID {} was returned", kid_hex(&kid));
            events.on_error(&msg);
            return Err(DrmError::key_not_found(msg));
        }
        Ok(())
    }

    /// Resolve one key id. Returns whether a CDM exchange took place.
    async fn resolve_kid(
        &self,
        title: &Title,
        track: &Track,
        drm: &mut DrmDescriptor,
        kid: Uuid,
        track_kid: Option<Uuid>,
        events: &dyn DrmEvents,
    ) -> Result<bool, DrmError> {
        let is_track_kid = track_kid == Some(kid);

        if self.mode != KeyMode::CdmOnly {
            let (key, vault) = self.vaults.get_key(&kid, Some(&title.service)).await;
            if let (Some(key), Some(vault)) = (key, vault) {
                drm.insert_key(kid, key.clone());
                events.on_key_found(
                    &kid_hex(&kid),
                    &key,
                    &format!("from {}", vault.name()),
                    is_track_kid,
                );
                self.vaults
                    .add_key(&kid, &key, Some(vault.as_ref()), Some(&title.service))
                    .await;
                return Ok(false);
            }
        }

        if self.mode == KeyMode::VaultsOnly {
            let msg = format!(
                "No Vault has a Key for {} and --vaults-only was used",
                kid_hex(&kid)
            );
            events.on_error(&msg);
            return Err(DrmError::key_not_found(msg));
        }

        let Some(cdm) = &self.cdm else {
            let err = DrmError::CdmRequired;
            events.on_error(&err.to_string());
            return Err(err);
        };

        let from_vaults = drm.content_keys.clone();
        let remaining = drm.unresolved_kids();
        debug!(
            title = %title,
            track = %track.id,
            remaining = remaining.len(),
            "Requesting licence from CDM"
        );

        let certificate = LicenceCall {
            service: self.service.as_ref(),
            title,
            track,
            kind: ChallengeKind::Certificate,
        };
        let licence = LicenceCall {
            kind: ChallengeKind::Licence,
            ..certificate
        };

        let obtained = match cdm.exchange(drm, &remaining, &certificate, &licence).await {
            Ok(keys) => keys,
            Err(e) => {
                let err = DrmError::from_exchange(e);
                events.on_error(&err.to_string());
                return Err(err);
            }
        };

        for (kid, key) in &obtained {
            events.on_key_found(&kid_hex(kid), key, "from CDM", track_kid == Some(*kid));
        }

        drm.content_keys.extend(obtained.clone());
        drm.content_keys.extend(from_vaults);

        let to_cache: BTreeMap<Uuid, ContentKey> = obtained
            .into_iter()
            .filter(|(_, key)| !key.is_placeholder())
            .collect();
        let cached = self.vaults.add_keys(&to_cache, Some(&title.service)).await;
        if cached > 0 {
            info!(
                "Cached {} Key{} to {} Vault{}",
                cached,
                if cached == 1 { "" } else { "s" },
                self.vaults.len(),
                if self.vaults.len() == 1 { "" } else { "s" }
            );
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use key_vaults::{KeyVault, VaultWrite};
    use media_tracks::{DrmScheme, Pssh, TitleKind, VideoAttrs, VideoCodec, WIDEVINE_SYSTEM_ID};
    use parking_lot::Mutex;
    use uuid::uuid;

    use super::*;
    use crate::drm::NoDrmEvents;

    const KID_A: Uuid = uuid!("0a0a0a0a-0a0a-0a0a-0a0a-0a0a0a0a0a0a");
    const KID_B: Uuid = uuid!("0b0b0b0b-0b0b-0b0b-0b0b-0b0b0b0b0b0b");

    fn key(digit: char) -> ContentKey {
        ContentKey::new(digit.to_string().repeat(32)).unwrap()
    }

    #[derive(Debug, Default)]
    struct FixedCdm {
        keys: BTreeMap<Uuid, ContentKey>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Cdm for FixedCdm {
        async fn exchange(
            &self,
            _descriptor: &DrmDescriptor,
            _kids: &[Uuid],
            certificate: &dyn ChallengeHandler,
            licence: &dyn ChallengeHandler,
        ) -> Result<BTreeMap<Uuid, ContentKey>, CdmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            certificate.respond(Bytes::from_static(&[0x08, 0x04])).await?;
            licence.respond(Bytes::from_static(b"challenge")).await?;
            Ok(self.keys.clone())
        }
    }

    struct EchoService;

    #[async_trait]
    impl LicenseService for EchoService {
        fn name(&self) -> &str {
            "TEST"
        }

        async fn license(&self, challenge: Bytes, _title: &Title, _track: &Track) -> Result<Bytes, CdmError> {
            Ok(challenge)
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl DrmEvents for Recorder {
        fn on_pssh_init(&self, scheme: &str, _pssh: &str) {
            self.0.lock().push(format!("pssh:{scheme}"));
        }

        fn on_key_found(&self, kid: &str, _key: &ContentKey, source: &str, _is_track_kid: bool) {
            self.0.lock().push(format!("key:{kid}:{source}"));
        }

        fn on_error(&self, message: &str) {
            self.0.lock().push(format!("error:{message}"));
        }
    }

    #[derive(Debug, Default)]
    struct MemoryVault(Mutex<BTreeMap<(String, Uuid), ContentKey>>);

    #[async_trait]
    impl KeyVault for MemoryVault {
        fn name(&self) -> &str {
            "Memory"
        }

        async fn get_key(&self, kid: &Uuid, service: &str) -> key_vaults::Result<Option<ContentKey>> {
            Ok(self.0.lock().get(&(service.to_string(), *kid)).cloned())
        }

        async fn add_key(
            &self,
            service: &str,
            kid: &Uuid,
            key: &ContentKey,
        ) -> key_vaults::Result<VaultWrite> {
            self.0.lock().insert((service.to_string(), *kid), key.clone());
            Ok(VaultWrite::Stored(1))
        }
    }

    async fn memory_vaults() -> Arc<Vaults> {
        let vault: Arc<dyn KeyVault> = Arc::new(MemoryVault::default());
        Arc::new(Vaults::new(vec![vault], "TEST").unwrap())
    }

    fn fixture() -> (Title, Track) {
        let title = Title::new("t1", "TEST", "Heat", TitleKind::Movie { year: Some(1995) });
        let pssh = Pssh::with_key_ids(WIDEVINE_SYSTEM_ID, vec![KID_A, KID_B], Vec::new());
        let track = Track::video(
            "v1",
            VideoAttrs {
                codec: VideoCodec::Avc,
                range: Default::default(),
                width: Some(1920),
                height: Some(1080),
                fps: None,
            },
            "en".parse().unwrap(),
        )
        .with_drm(DrmDescriptor::new(DrmScheme::Widevine, pssh, [KID_A, KID_B]));
        (title, track)
    }

    #[test]
    fn test_key_mode_parses_kebab_case() {
        assert_eq!("vaults-only".parse::<KeyMode>().unwrap(), KeyMode::VaultsOnly);
        assert_eq!(KeyMode::CdmOnly.to_string(), "cdm-only");
    }

    #[tokio::test]
    async fn test_cdm_only_skips_vaults_and_caches_result() {
        let vaults = memory_vaults().await;
        vaults.add_key(&KID_A, &key('1'), None, None).await;

        let cdm = Arc::new(FixedCdm {
            keys: BTreeMap::from([(KID_A, key('a')), (KID_B, key('b'))]),
            ..Default::default()
        });
        let broker = KeyBroker::new(
            Some(cdm.clone() as Arc<dyn Cdm>),
            vaults.clone(),
            KeyMode::CdmOnly,
            Arc::new(EchoService),
            None,
        );

        let (title, mut track) = fixture();
        let events = Recorder::default();
        let drm = broker
            .prepare_keys(&title, &mut track, Some(KID_A), &events)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(cdm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(drm.content_keys[&KID_A], key('a'));
        assert_eq!(track.drm_descriptor(), Some(&drm));
        assert_eq!(vaults.get_key(&KID_B, None).await.0, Some(key('b')));

        let log = events.0.lock();
        assert_eq!(log[0], "pssh:Widevine");
        assert!(log[1..].iter().all(|e| e.ends_with(":from CDM")));
    }

    #[tokio::test]
    async fn test_missing_track_kid_after_exchange_is_an_error() {
        let cdm = Arc::new(FixedCdm {
            keys: BTreeMap::from([(KID_B, key('b'))]),
            ..Default::default()
        });
        let broker = KeyBroker::new(
            Some(cdm as Arc<dyn Cdm>),
            memory_vaults().await,
            KeyMode::Any,
            Arc::new(EchoService),
            None,
        );

        let (title, mut track) = fixture();
        let events = Recorder::default();
        let err = broker
            .prepare_keys(&title, &mut track, Some(KID_A), &events)
            .await
            .unwrap_err();

        assert!(matches!(err, DrmError::KeyNotFound(_)));
        assert_eq!(
            events.0.lock().last().unwrap(),
            &format!("error:No Content Key for KID {} was returned", kid_hex(&KID_A))
        );
        // The key that was returned is still kept on the track.
        assert!(track.drm_descriptor().unwrap().has_key(&KID_B));
    }

    #[tokio::test]
    async fn test_cdm_required_only_when_exchange_needed() {
        let vaults = memory_vaults().await;
        let broker = KeyBroker::new(None, vaults.clone(), KeyMode::Any, Arc::new(EchoService), None);
        let (title, mut track) = fixture();

        let err = broker
            .prepare_keys(&title, &mut track, None, &NoDrmEvents)
            .await
            .unwrap_err();
        assert!(matches!(err, DrmError::CdmRequired));

        vaults.add_key(&KID_A, &key('a'), None, None).await;
        vaults.add_key(&KID_B, &key('b'), None, None).await;
        let (title, mut track) = fixture();
        let drm = broker
            .prepare_keys(&title, &mut track, Some(KID_A), &NoDrmEvents)
            .await
            .unwrap()
            .unwrap();
        assert!(drm.is_resolved());
    }

    #[tokio::test]
    async fn test_clear_tracks_are_untouched() {
        let broker = KeyBroker::new(
            None,
            memory_vaults().await,
            KeyMode::Any,
            Arc::new(EchoService),
            None,
        );
        let (title, track) = fixture();
        let mut clear = Track { drm: Vec::new(), ..track };

        let events = Recorder::default();
        let result = broker
            .prepare_keys(&title, &mut clear, None, &events)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(events.0.lock().is_empty());
    }
}
