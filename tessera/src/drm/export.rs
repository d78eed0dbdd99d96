//! Optional JSON export of every key resolved during a run.
//!
//! ```json
//! { "Movie (2020)": { "VID | [AVC, SDR] | en | ...": { "<kid>": "<key>" } } }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use media_tracks::{ContentKey, kid_hex, parse_kid};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::ExportError;

#[derive(Debug)]
pub struct KeyExport {
    path: PathBuf,
    lock: Mutex<()>,
}

impl KeyExport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current document, or an empty one if the file does not exist yet.
    pub async fn read(&self) -> Result<Map<String, Value>, ExportError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Map::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the key map stored for (`title`, `track`), keeping every other entry.
    pub async fn merge<'a>(
        &self,
        title: &str,
        track: &str,
        keys: impl IntoIterator<Item = (&'a Uuid, &'a ContentKey)>,
    ) -> Result<(), ExportError> {
        let keys: Map<String, Value> = keys
            .into_iter()
            .map(|(kid, key)| (kid_hex(kid), Value::String(key.to_string())))
            .collect();

        let _guard = self.lock.lock().await;
        let mut document = self.read().await?;

        let title_entry = document
            .entry(title.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !title_entry.is_object() {
            *title_entry = Value::Object(Map::new());
        }
        if let Value::Object(tracks) = title_entry {
            tracks.insert(track.to_string(), Value::Object(keys));
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&document)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), title, track, "Exported keys");
        Ok(())
    }

    /// Every key in the document, across titles and tracks.
    ///
    /// Entries that are not a valid key id and key pair are skipped.
    pub async fn keys(&self) -> Result<BTreeMap<Uuid, ContentKey>, ExportError> {
        let document = self.read().await?;
        let mut keys = BTreeMap::new();
        let entries = document
            .values()
            .filter_map(Value::as_object)
            .flat_map(|tracks| tracks.values())
            .filter_map(Value::as_object)
            .flat_map(|track| track.iter());
        for (kid, key) in entries {
            match (parse_kid(kid), key.as_str().map(ContentKey::new)) {
                (Ok(kid), Some(Ok(key))) => {
                    keys.insert(kid, key);
                }
                _ => warn!(kid = %kid, "Skipping invalid entry in key export"),
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(hex: &str) -> ContentKey {
        ContentKey::new(hex).unwrap()
    }

    #[tokio::test]
    async fn test_merge_creates_file_and_preserves_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        let export = KeyExport::new(dir.path().join("out").join("keys.json"));

        let (a, b) = (Uuid::from_u128(0xa), Uuid::from_u128(0xb));
        let (ka, kb) = (key(&"aa".repeat(16)), key(&"bb".repeat(16)));

        export.merge("Title (2020)", "video", [(&a, &ka)]).await.unwrap();
        export.merge("Title (2020)", "audio", [(&b, &kb)]).await.unwrap();
        export.merge("Other", "video", [(&b, &kb)]).await.unwrap();

        let doc = export.read().await.unwrap();
        assert_eq!(doc["Title (2020)"]["video"][kid_hex(&a)], ka.as_str());
        assert_eq!(doc["Title (2020)"]["audio"][kid_hex(&b)], kb.as_str());
        assert_eq!(doc["Other"]["video"][kid_hex(&b)], kb.as_str());
    }

    #[tokio::test]
    async fn test_merge_overwrites_only_the_same_track() {
        let dir = tempfile::tempdir().unwrap();
        let export = KeyExport::new(dir.path().join("keys.json"));
        let (a, b) = (Uuid::from_u128(0xa), Uuid::from_u128(0xb));

        export.merge("T", "video", [(&a, &key(&"aa".repeat(16)))]).await.unwrap();
        export.merge("T", "video", [(&b, &key(&"bb".repeat(16)))]).await.unwrap();

        let doc = export.read().await.unwrap();
        let video = doc["T"]["video"].as_object().unwrap();
        assert_eq!(video.len(), 1);
        assert!(video.contains_key(&kid_hex(&b)));
    }

    #[tokio::test]
    async fn test_keys_flattens_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let (a, b) = (Uuid::from_u128(0xa), Uuid::from_u128(0xb));
        let document = format!(
            r#"{{
                "T1": {{ "video": {{ "{a}": "{ka}" }} }},
                "T2": {{ "audio": {{ "{b}": "{kb}", "not-a-kid": "{kb}" }} }}
            }}"#,
            a = kid_hex(&a),
            b = kid_hex(&b),
            ka = "aa".repeat(16),
            kb = "bb".repeat(16),
        );
        tokio::fs::write(&path, document).await.unwrap();

        let keys = KeyExport::new(&path).keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[&a], key(&"aa".repeat(16)));
    }

    #[tokio::test]
    async fn test_concurrent_merges_do_not_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let export = Arc::new(KeyExport::new(dir.path().join("keys.json")));

        let mut handles = Vec::new();
        for i in 0..8u128 {
            let export = export.clone();
            handles.push(tokio::spawn(async move {
                let kid = Uuid::from_u128(i);
                let key = ContentKey::from_bytes(&(i + 1).to_be_bytes());
                export.merge("T", &format!("track-{i}"), [(&kid, &key)]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let doc = export.read().await.unwrap();
        assert_eq!(doc["T"].as_object().unwrap().len(), 8);
    }
}
