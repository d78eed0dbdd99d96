use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::ApiVault;
use crate::error::Result;
use crate::mysql::{MySqlConfig, MySqlVault};
use crate::sqlite::SqliteVault;
use crate::vault::KeyVault;

fn default_mysql_port() -> u16 {
    3306
}

/// One `[[drm.vaults]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VaultConfig {
    #[serde(rename = "SQLite", alias = "sqlite")]
    Sqlite { name: String, path: PathBuf },

    #[serde(rename = "MySQL", alias = "mysql")]
    MySql {
        name: String,
        host: String,
        #[serde(default = "default_mysql_port")]
        port: u16,
        database: String,
        username: String,
        #[serde(default)]
        password: Option<String>,
    },

    #[serde(rename = "API", alias = "api")]
    Api {
        name: String,
        uri: String,
        token: String,
    },
}

impl VaultConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Sqlite { name, .. } | Self::MySql { name, .. } | Self::Api { name, .. } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sqlite { .. } => "SQLite",
            Self::MySql { .. } => "MySQL",
            Self::Api { .. } => "API",
        }
    }

    /// Build the backend described by this entry.
    pub async fn connect(&self) -> Result<Arc<dyn KeyVault>> {
        let vault: Arc<dyn KeyVault> = match self {
            Self::Sqlite { name, path } => Arc::new(SqliteVault::connect(name.clone(), path).await?),
            Self::MySql {
                name,
                host,
                port,
                database,
                username,
                password,
            } => {
                let config = MySqlConfig {
                    host: host.clone(),
                    port: *port,
                    database: database.clone(),
                    username: username.clone(),
                    password: password.clone(),
                };
                Arc::new(MySqlVault::connect(name.clone(), &config).await?)
            }
            Self::Api { name, uri, token } => {
                Arc::new(ApiVault::new(name.clone(), uri.clone(), token.clone())?)
            }
        };
        Ok(vault)
    }
}
