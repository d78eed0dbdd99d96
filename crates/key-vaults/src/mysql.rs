//! MySQL-backed vault, typically a shared team database.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use media_tracks::{ContentKey, kid_hex};
use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::vault::{KeyVault, VaultWrite, table_name};

const DEFAULT_READ_POOL_SIZE: u32 = 4;

/// ER_DBACCESS_DENIED_ERROR, ER_ACCESS_DENIED_ERROR, ER_TABLEACCESS_DENIED_ERROR.
const ACCESS_DENIED: [u16; 3] = [1044, 1045, 1142];

/// ER_NO_SUCH_TABLE
const NO_SUCH_TABLE: u16 = 1146;

#[derive(Debug, Clone)]
pub struct MySqlConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MySqlVault {
    name: String,
    read_pool: MySqlPool,
    write_pool: MySqlPool,
}

impl MySqlVault {
    pub async fn connect(name: impl Into<String>, config: &MySqlConfig) -> Result<Self> {
        let name = name.into();
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.username);
        if let Some(password) = &config.password {
            options = options.password(password);
        }

        let read_pool = MySqlPoolOptions::new()
            .max_connections(DEFAULT_READ_POOL_SIZE)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options.clone())
            .await?;

        let write_pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(60))
            .connect_with(options)
            .await?;

        info!(
            vault = %name,
            host = %config.host,
            database = %config.database,
            "MySQL vault connected"
        );

        Ok(Self {
            name,
            read_pool,
            write_pool,
        })
    }

    async fn insert(&self, table: &str, keys: &BTreeMap<Uuid, ContentKey>) -> Result<usize> {
        let mut tx = self.write_pool.begin().await?;

        sqlx::query(&create_table_sql(table))
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0;
        for (kid, key) in keys {
            if key.is_placeholder() {
                continue;
            }
            let result = sqlx::query(&format!(
                "INSERT IGNORE INTO `{table}` (kid, key_) VALUES (?, ?)"
            ))
            .bind(kid_hex(kid))
            .bind(key.as_str())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn write(&self, service: &str, keys: &BTreeMap<Uuid, ContentKey>) -> Result<VaultWrite> {
        let table = table_name(service)
            .ok_or_else(|| VaultError::config(format!("invalid service name `{service}`")))?;

        match self.insert(&table, keys).await {
            Ok(inserted) => Ok(VaultWrite::Stored(inserted)),
            Err(VaultError::Sqlx(e)) if error_number(&e).is_some_and(|n| ACCESS_DENIED.contains(&n)) => {
                debug!(vault = %self.name, error = %e, "No write permission on vault");
                Ok(VaultWrite::PermissionDenied)
            }
            Err(e) => Err(e),
        }
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS `{table}` (
            id INTEGER NOT NULL AUTO_INCREMENT PRIMARY KEY,
            kid VARCHAR(64) NOT NULL,
            key_ VARCHAR(64) NOT NULL,
            UNIQUE (kid, key_)
        )"
    )
}

fn error_number(err: &sqlx::Error) -> Option<u16> {
    err.as_database_error()
        .and_then(|e| e.try_downcast_ref::<MySqlDatabaseError>())
        .map(MySqlDatabaseError::number)
}

#[async_trait]
impl KeyVault for MySqlVault {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_key(&self, kid: &Uuid, service: &str) -> Result<Option<ContentKey>> {
        let Some(table) = table_name(service) else {
            return Ok(None);
        };

        let rows = match sqlx::query(&format!(
            "SELECT key_ FROM `{table}` WHERE kid = ? ORDER BY id"
        ))
        .bind(kid_hex(kid))
        .fetch_all(&self.read_pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) if error_number(&e) == Some(NO_SUCH_TABLE) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        for row in rows {
            let key = ContentKey::new(row.get::<String, _>("key_"))?;
            if !key.is_placeholder() {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    async fn add_key(&self, service: &str, kid: &Uuid, key: &ContentKey) -> Result<VaultWrite> {
        self.write(service, &BTreeMap::from([(*kid, key.clone())]))
            .await
    }

    async fn add_keys(
        &self,
        service: &str,
        keys: &BTreeMap<Uuid, ContentKey>,
    ) -> Result<VaultWrite> {
        self.write(service, keys).await
    }
}
