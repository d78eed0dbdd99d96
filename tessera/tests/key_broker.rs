mod common;

use std::sync::Arc;

use tessera::drm::{Cdm, DrmError, KeyBroker, KeyExport, KeyMode, NoDrmEvents};
use tessera::events::{TitleEvent, TitleEvents};

use common::*;

fn broker(
    cdm: Option<Arc<FixedCdm>>,
    vaults: &[Arc<MemoryVault>],
    mode: KeyMode,
    export: Option<Arc<KeyExport>>,
) -> KeyBroker {
    KeyBroker::new(
        cdm.map(|c| c as Arc<dyn Cdm>),
        pool(vaults),
        mode,
        Arc::new(EchoService::default()),
        export,
    )
}

#[tokio::test]
async fn vault_hit_then_single_exchange_for_the_rest() {
    let (kid_a, kid_b) = (kid(0xa), kid(0xb));
    let local = Arc::new(MemoryVault::new("Local").with_key(kid_a, key('a')));
    let shared = Arc::new(MemoryVault::new("Shared"));
    let cdm = Arc::new(FixedCdm::new([(kid_b, key('b'))]));
    let dir = tempfile::tempdir().unwrap();
    let export = Arc::new(KeyExport::new(dir.path().join("keys.json")));
    let broker = broker(
        Some(cdm.clone()),
        &[local.clone(), shared.clone()],
        KeyMode::Any,
        Some(export.clone()),
    );

    let title = title();
    let mut track = video("v1", 1080).with_drm(widevine(&[kid_a, kid_b]));
    let bus = TitleEvents::new();
    let mut rx = bus.subscribe();

    let drm = broker
        .prepare_keys(&title, &mut track, Some(kid_a), &bus.for_track("v1"))
        .await
        .unwrap()
        .unwrap();

    assert!(drm.is_resolved());
    assert_eq!(cdm.calls(), 1);
    assert_eq!(cdm.requested.lock()[0], vec![kid_b]);
    assert_eq!(track.drm_descriptor(), Some(&drm));

    // The hit in Local warms Shared, and the CDM key lands in both.
    assert_eq!(shared.get(&kid_a), Some(key('a')));
    assert_eq!(local.get(&kid_b), Some(key('b')));
    assert_eq!(shared.get(&kid_b), Some(key('b')));

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events[0], TitleEvent::PsshInit { ref scheme, .. } if scheme == "Widevine"));
    assert!(matches!(
        events[1],
        TitleEvent::KeyFound { ref source, is_track_kid: true, .. } if source == "from Local"
    ));
    assert!(matches!(
        events[2],
        TitleEvent::KeyFound { ref source, is_track_kid: false, .. } if source == "from CDM"
    ));
    assert!(events.iter().all(|e| e.track_id() == "v1"));

    let exported = export.keys().await.unwrap();
    assert_eq!(exported.len(), 2);
    assert_eq!(exported.get(&kid_b), Some(&key('b')));
}

#[tokio::test]
async fn cached_keys_skip_the_cdm_next_time() {
    let (kid_a, kid_b) = (kid(0xa), kid(0xb));
    let local = Arc::new(MemoryVault::new("Local"));
    let cdm = Arc::new(FixedCdm::new([(kid_a, key('a')), (kid_b, key('b'))]));
    let broker = broker(Some(cdm.clone()), &[local.clone()], KeyMode::Any, None);
    let title = title();

    let mut first = video("v1", 1080).with_drm(widevine(&[kid_a, kid_b]));
    broker
        .prepare_keys(&title, &mut first, Some(kid_a), &NoDrmEvents)
        .await
        .unwrap();
    assert_eq!(cdm.calls(), 1);

    let mut second = video("v2", 720).with_drm(widevine(&[kid_a, kid_b]));
    let drm = broker
        .prepare_keys(&title, &mut second, Some(kid_a), &NoDrmEvents)
        .await
        .unwrap()
        .unwrap();
    assert!(drm.is_resolved());
    assert_eq!(cdm.calls(), 1);
}

#[tokio::test]
async fn vaults_only_never_contacts_the_cdm() {
    let (kid_a, kid_b) = (kid(0xa), kid(0xb));
    let local = Arc::new(MemoryVault::new("Local").with_key(kid_a, key('a')));
    let cdm = Arc::new(FixedCdm::new([(kid_b, key('b'))]));
    let broker = broker(Some(cdm.clone()), &[local], KeyMode::VaultsOnly, None);

    let title = title();
    let mut track = video("v1", 1080).with_drm(widevine(&[kid_a, kid_b]));
    let bus = TitleEvents::new();
    let mut rx = bus.subscribe();

    let err = broker
        .prepare_keys(&title, &mut track, Some(kid_a), &bus.for_track("v1"))
        .await
        .unwrap_err();

    assert!(matches!(err, DrmError::KeyNotFound(ref msg) if msg.contains("--vaults-only")));
    assert_eq!(cdm.calls(), 0);
    // Keys found before the failure stay on the track.
    let drm = track.drm_descriptor().unwrap();
    assert!(drm.has_key(&kid_a));
    assert!(!drm.has_key(&kid_b));

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event);
    }
    assert!(matches!(last, Some(TitleEvent::DrmError { .. })));
}

#[tokio::test]
async fn missing_track_key_fails_even_when_others_resolve() {
    let (kid_a, kid_b) = (kid(0xa), kid(0xb));
    let cdm = Arc::new(FixedCdm::new([(kid_b, key('b'))]));
    let broker = broker(
        Some(cdm.clone()),
        &[Arc::new(MemoryVault::new("Local"))],
        KeyMode::CdmOnly,
        None,
    );

    let title = title();
    let mut track = video("v1", 1080).with_drm(widevine(&[kid_a, kid_b]));
    let err = broker
        .prepare_keys(&title, &mut track, Some(kid_a), &NoDrmEvents)
        .await
        .unwrap_err();

    assert!(matches!(err, DrmError::KeyNotFound(ref msg) if msg.contains(&media_tracks::kid_hex(&kid_a))));
    assert_eq!(cdm.calls(), 1);
    assert!(track.drm_descriptor().unwrap().has_key(&kid_b));
}

#[tokio::test]
async fn no_cdm_is_only_an_error_when_vaults_miss() {
    let kid_a = kid(0xa);
    let title = title();

    let stocked = broker(
        None,
        &[Arc::new(MemoryVault::new("Local").with_key(kid_a, key('a')))],
        KeyMode::Any,
        None,
    );
    let mut track = video("v1", 1080).with_drm(widevine(&[kid_a]));
    assert!(
        stocked
            .prepare_keys(&title, &mut track, Some(kid_a), &NoDrmEvents)
            .await
            .is_ok()
    );

    let empty = broker(None, &[Arc::new(MemoryVault::new("Local"))], KeyMode::Any, None);
    let mut track = video("v1", 1080).with_drm(widevine(&[kid_a]));
    let err = empty
        .prepare_keys(&title, &mut track, Some(kid_a), &NoDrmEvents)
        .await
        .unwrap_err();
    assert!(matches!(err, DrmError::CdmRequired));
}

#[tokio::test]
async fn shared_pssh_checks_the_tracks_own_kid() {
    let (kid_audio, kid_video) = (kid(0xa), kid(0xb));
    let title = title();

    // The licence only carries the video key.
    let cdm = Arc::new(FixedCdm::new([(kid_video, key('b'))]));
    let broker = broker(Some(cdm.clone()), &[], KeyMode::CdmOnly, None);
    let mut track = video("v1", 1080)
        .with_drm(widevine(&[kid_audio, kid_video]))
        .with_kid(kid_video);
    let bus = TitleEvents::new();
    let mut rx = bus.subscribe();

    let track_kid = track.primary_kid();
    assert_eq!(track_kid, Some(kid_video));
    let drm = broker
        .prepare_keys(&title, &mut track, track_kid, &bus.for_track("v1"))
        .await
        .unwrap()
        .unwrap();
    assert!(drm.has_key(&kid_video));
    assert!(!drm.has_key(&kid_audio));

    let mut found = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let TitleEvent::KeyFound { kid, is_track_kid, .. } = event {
            found.push((kid, is_track_kid));
        }
    }
    assert_eq!(found, vec![(media_tracks::kid_hex(&kid_video), true)]);

    // The same licence cannot serve the audio track sharing the header.
    let mut audio_track = audio("a1", "en")
        .with_drm(widevine(&[kid_audio, kid_video]))
        .with_kid(kid_audio);
    let track_kid = audio_track.primary_kid();
    let err = broker
        .prepare_keys(&title, &mut audio_track, track_kid, &NoDrmEvents)
        .await
        .unwrap_err();
    assert!(matches!(err, DrmError::KeyNotFound(ref msg) if msg.contains(&media_tracks::kid_hex(&kid_audio))));
}
