use media_tracks::ContentKey;

/// Progress notifications emitted while resolving one track's keys.
///
/// For a given track they arrive in order: `on_pssh_init`, then any number of
/// `on_key_found`, then at most one `on_error` right before a failure is
/// returned. Tracks resolved concurrently interleave freely.
pub trait DrmEvents: Send + Sync {
    fn on_pssh_init(&self, scheme: &str, pssh: &str);

    fn on_key_found(&self, kid: &str, key: &ContentKey, source: &str, is_track_kid: bool);

    fn on_error(&self, message: &str);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDrmEvents;

impl DrmEvents for NoDrmEvents {
    fn on_pssh_init(&self, _scheme: &str, _pssh: &str) {}

    fn on_key_found(&self, _kid: &str, _key: &ContentKey, _source: &str, _is_track_kid: bool) {}

    fn on_error(&self, _message: &str) {}
}
