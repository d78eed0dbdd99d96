//! The backend contract every key vault implements.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use media_tracks::ContentKey;
use uuid::Uuid;

use crate::error::Result;

/// Outcome of a write to a single vault.
///
/// `PermissionDenied` and `Unsupported` are expected states for read-only or
/// lookup-only vaults, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultWrite {
    /// Number of rows newly stored (0 when every key was already present).
    Stored(usize),
    PermissionDenied,
    Unsupported,
}

impl VaultWrite {
    pub fn stored(&self) -> usize {
        match self {
            Self::Stored(n) => *n,
            Self::PermissionDenied | Self::Unsupported => 0,
        }
    }
}

/// A persistent store of content keys, namespaced by service.
#[async_trait]
pub trait KeyVault: Send + Sync + fmt::Debug {
    /// Identity of this vault within a pool.
    fn name(&self) -> &str;

    /// Look up the key for `kid` under `service`.
    async fn get_key(&self, kid: &Uuid, service: &str) -> Result<Option<ContentKey>>;

    /// Store one key. Storing a (kid, key) pair that already exists is a no-op.
    async fn add_key(&self, service: &str, kid: &Uuid, key: &ContentKey) -> Result<VaultWrite>;

    /// Store many keys at once. A refusal part way through still reports the
    /// keys written before it.
    async fn add_keys(
        &self,
        service: &str,
        keys: &BTreeMap<Uuid, ContentKey>,
    ) -> Result<VaultWrite> {
        let mut stored = 0;
        for (kid, key) in keys {
            match self.add_key(service, kid, key).await? {
                VaultWrite::Stored(n) => stored += n,
                other if stored == 0 => return Ok(other),
                _ => break,
            }
        }
        Ok(VaultWrite::Stored(stored))
    }
}

/// Map a service tag onto a safe table name: ASCII alphanumerics and `_` only.
pub(crate) fn table_name(service: &str) -> Option<String> {
    let name: String = service
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    (!name.is_empty()).then_some(name)
}
