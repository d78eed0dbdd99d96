//! Application configuration, read from a TOML file.
//!
//! ```toml
//! [drm]
//! default_cdm = "chrome"
//! key_export = "keys.json"
//!
//! [drm.cdm.chrome]
//! host = "https://cdm.example.com"
//! secret = "..."
//! device_name = "chrome_l3"
//!
//! [[drm.vaults]]
//! type = "SQLite"
//! name = "Local"
//! path = "~/.local/share/tessera/vault.db"
//!
//! [downloads]
//! concurrent = 2
//!
//! [selection]
//! quality = [1080]
//!
//! [services.EXAMPLE]
//! cdm = "android"
//! profiles.premium.cdm = "chrome"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use key_vaults::{VaultConfig, VaultError, Vaults};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::downloader::{DownloadConfig, SelectionCriteria};
use crate::drm::{Cdm, KeyMode, RemoteCdm};
use crate::error::{Error, Result};

const CONFIG_DIR: &str = "tessera";
const CONFIG_FILE: &str = "tessera.toml";
const REDACTED: &str = "********";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub drm: DrmConfig,
    pub downloads: DownloadConfig,
    pub selection: SelectionCriteria,
    /// Per-service overrides, keyed by service tag.
    pub services: BTreeMap<String, ServiceConfig>,
    /// Directory for rolling log files; console only when unset.
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrmConfig {
    /// CDM used by services without their own.
    pub default_cdm: Option<String>,
    pub cdm: BTreeMap<String, CdmConfig>,
    /// Vaults in priority order.
    pub vaults: Vec<VaultConfig>,
    pub mode: KeyMode,
    /// JSON file every resolved key is exported to.
    pub key_export: Option<PathBuf>,
}

/// A CDM served over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdmConfig {
    pub host: String,
    pub secret: String,
    pub device_name: String,
}

impl CdmConfig {
    pub fn connect(&self) -> Result<Arc<dyn Cdm>> {
        let cdm = RemoteCdm::new(&self.host, &self.secret, &self.device_name)
            .map_err(|e| Error::config(format!("Failed to create CDM client: {e}")))?;
        Ok(Arc::new(cdm))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cdm: Option<String>,
    pub profiles: BTreeMap<String, ProfileConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub cdm: Option<String>,
}

impl ServiceConfig {
    /// CDM name for `profile`: the profile's own, else the service's.
    pub fn cdm(&self, profile: Option<&str>) -> Option<&str> {
        profile
            .and_then(|p| self.profiles.get(p))
            .and_then(|p| p.cdm.as_deref())
            .or(self.cdm.as_deref())
    }
}

impl AppConfig {
    /// `<config dir>/tessera/tessera.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location.
    ///
    /// A missing file at the default location yields the defaults; a missing
    /// file that was asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };
        let contents = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&contents)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for vault in &self.drm.vaults {
            if !seen.insert(vault.name()) {
                return Err(VaultError::DuplicateVault(vault.name().to_string()).into());
            }
        }

        if let Some(name) = &self.drm.default_cdm
            && !self.drm.cdm.contains_key(name)
        {
            return Err(Error::config(format!("default CDM `{name}` is not defined")));
        }
        for (tag, service) in &self.services {
            let names = service
                .cdm
                .iter()
                .chain(service.profiles.values().filter_map(|p| p.cdm.as_ref()));
            for name in names {
                if !self.drm.cdm.contains_key(name) {
                    return Err(Error::config(format!(
                        "CDM `{name}` used by service {tag} is not defined"
                    )));
                }
            }
        }

        if self.downloads.concurrent == 0 {
            return Err(Error::config("downloads.concurrent must be at least 1"));
        }
        Ok(())
    }

    /// Name of the CDM for `service` and `profile`.
    ///
    /// Precedence: the profile's CDM, then the service's, then `default_cdm`.
    pub fn cdm_name(&self, service: &str, profile: Option<&str>) -> Option<&str> {
        self.services
            .get(service)
            .and_then(|s| s.cdm(profile))
            .or(self.drm.default_cdm.as_deref())
    }

    /// The CDM configuration for `service`, if any is configured.
    pub fn cdm_for(&self, service: &str, profile: Option<&str>) -> Result<Option<&CdmConfig>> {
        let Some(name) = self.cdm_name(service, profile) else {
            return Ok(None);
        };
        self.drm
            .cdm
            .get(name)
            .map(Some)
            .ok_or_else(|| Error::config(format!("CDM `{name}` is not defined")))
    }

    /// Connect every configured vault.
    pub async fn vaults(&self, service: &str) -> Result<Vaults> {
        Ok(Vaults::from_config(&self.drm.vaults, service).await?)
    }

    /// A copy safe to print: secrets, tokens and passwords are masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for cdm in config.drm.cdm.values_mut() {
            cdm.secret = REDACTED.to_string();
        }
        for vault in &mut config.drm.vaults {
            match vault {
                VaultConfig::Api { token, .. } => *token = REDACTED.to_string(),
                VaultConfig::MySql {
                    password: Some(password),
                    ..
                } => *password = REDACTED.to_string(),
                _ => {}
            }
        }
        config
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::other(format!("Failed to render config: {e}")))
    }
}
