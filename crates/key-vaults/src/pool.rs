//! Priority-ordered pool of vaults.
//!
//! Reads stop at the first vault holding a real key. Writes go to every vault
//! and never fail the caller: a vault that refuses or errors is logged and
//! skipped so the remaining vaults still get the key.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use media_tracks::{ContentKey, kid_hex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::vault::{KeyVault, VaultWrite};

#[derive(Debug, Clone)]
pub struct Vaults {
    vaults: Vec<Arc<dyn KeyVault>>,
    service: String,
}

impl Vaults {
    /// Build a pool. Order is priority order. Vault names must be unique.
    pub fn new(vaults: Vec<Arc<dyn KeyVault>>, service: impl Into<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for vault in &vaults {
            if !seen.insert(vault.name().to_string()) {
                return Err(VaultError::DuplicateVault(vault.name().to_string()));
            }
        }
        Ok(Self {
            vaults,
            service: service.into(),
        })
    }

    /// Connect every configured vault, in configuration order.
    pub async fn from_config(configs: &[VaultConfig], service: impl Into<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for config in configs {
            if !seen.insert(config.name()) {
                return Err(VaultError::DuplicateVault(config.name().to_string()));
            }
        }

        let mut vaults = Vec::with_capacity(configs.len());
        for config in configs {
            vaults.push(config.connect().await?);
        }
        Self::new(vaults, service)
    }

    /// Default service namespace used when callers pass `None`.
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn len(&self) -> usize {
        self.vaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn KeyVault>> {
        self.vaults.iter()
    }

    /// First real key for `kid`, with the vault it came from.
    ///
    /// Placeholder (all-zero) keys are skipped as if absent, and a vault
    /// that fails to answer is skipped with a warning.
    pub async fn get_key(
        &self,
        kid: &Uuid,
        service: Option<&str>,
    ) -> (Option<ContentKey>, Option<Arc<dyn KeyVault>>) {
        let service = service.unwrap_or(&self.service);
        for vault in &self.vaults {
            match vault.get_key(kid, service).await {
                Ok(Some(key)) if !key.is_placeholder() => return (Some(key), Some(vault.clone())),
                Ok(_) => {}
                Err(e) => {
                    warn!(vault = %vault.name(), kid = %kid_hex(kid), error = %e, "Vault lookup failed");
                }
            }
        }
        (None, None)
    }

    /// Store a key in every vault except `excluding`. Returns rows stored.
    pub async fn add_key(
        &self,
        kid: &Uuid,
        key: &ContentKey,
        excluding: Option<&dyn KeyVault>,
        service: Option<&str>,
    ) -> usize {
        if key.is_placeholder() {
            return 0;
        }
        let service = service.unwrap_or(&self.service);
        let mut stored = 0;
        for vault in &self.vaults {
            if excluding.is_some_and(|ex| ex.name() == vault.name()) {
                continue;
            }
            let outcome = vault.add_key(service, kid, key).await;
            stored += absorb(vault.as_ref(), outcome);
        }
        stored
    }

    /// Store many keys in every vault. Placeholder keys are dropped first.
    pub async fn add_keys(&self, keys: &BTreeMap<Uuid, ContentKey>, service: Option<&str>) -> usize {
        let keys: BTreeMap<Uuid, ContentKey> = keys
            .iter()
            .filter(|(_, key)| !key.is_placeholder())
            .map(|(kid, key)| (*kid, key.clone()))
            .collect();
        if keys.is_empty() {
            return 0;
        }

        let service = service.unwrap_or(&self.service);
        let mut stored = 0;
        for vault in &self.vaults {
            let outcome = vault.add_keys(service, &keys).await;
            stored += absorb(vault.as_ref(), outcome);
        }
        stored
    }
}

fn absorb(vault: &dyn KeyVault, outcome: Result<VaultWrite>) -> usize {
    match outcome {
        Ok(VaultWrite::Stored(n)) => n,
        Ok(VaultWrite::PermissionDenied) => {
            debug!(vault = %vault.name(), "Skipped vault without write permission");
            0
        }
        Ok(VaultWrite::Unsupported) => {
            debug!(vault = %vault.name(), "Skipped vault that does not support writes");
            0
        }
        Err(e) => {
            warn!(vault = %vault.name(), error = %e, "Failed to write key to vault");
            0
        }
    }
}
