//! SQLite-backed vault.
//!
//! Each service gets its own table. Reads go through a small shared pool;
//! writes go through a single-connection pool so only one connection ever
//! holds the SQLite write lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use media_tracks::{ContentKey, kid_hex};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::vault::{KeyVault, VaultWrite, table_name};

const DEFAULT_READ_POOL_SIZE: u32 = 4;

/// Busy timeout in milliseconds; other processes may share the file.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Extended result codes share the primary code in their low byte.
const SQLITE_READONLY: i32 = 8;

fn connect_options(path: &Path, create: bool) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .create_if_missing(create)
}

#[derive(Debug, Clone)]
pub struct SqliteVault {
    name: String,
    path: Option<PathBuf>,
    read_pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqliteVault {
    /// Open (creating if missing) the vault database at `path`.
    pub async fn connect(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let name = name.into();
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                VaultError::config(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let read_pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_READ_POOL_SIZE)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options(path, true))
            .await?;

        let write_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(60))
            .connect_with(connect_options(path, true))
            .await?;

        info!(vault = %name, path = %path.display(), "SQLite vault opened");

        Ok(Self {
            name,
            path: Some(path.to_path_buf()),
            read_pool,
            write_pool,
        })
    }

    /// Use one existing pool for both reads and writes.
    ///
    /// Intended for in-memory databases, where every connection would
    /// otherwise see its own empty database.
    pub fn from_pool(name: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            name: name.into(),
            path: None,
            read_pool: pool.clone(),
            write_pool: pool,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(&self.read_pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(&self, table: &str, keys: &BTreeMap<Uuid, ContentKey>) -> Result<usize> {
        let mut tx = self.write_pool.begin().await?;

        sqlx::query(&format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kid TEXT NOT NULL COLLATE NOCASE,
                key_ TEXT NOT NULL COLLATE NOCASE,
                UNIQUE (kid, key_)
            )"#
        ))
        .execute(&mut *tx)
        .await?;

        let mut inserted = 0;
        for (kid, key) in keys {
            if key.is_placeholder() {
                continue;
            }
            let result = sqlx::query(&format!(
                r#"INSERT OR IGNORE INTO "{table}" (kid, key_) VALUES (?, ?)"#
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
            Err(VaultError::Sqlx(e)) if is_read_only(&e) => {
                debug!(vault = %self.name, "Vault database is read-only");
                Ok(VaultWrite::PermissionDenied)
            }
            Err(e) => Err(e),
        }
    }
}

fn is_read_only(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| code & 0xff == SQLITE_READONLY)
}

#[async_trait]
impl KeyVault for SqliteVault {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_key(&self, kid: &Uuid, service: &str) -> Result<Option<ContentKey>> {
        let Some(table) = table_name(service) else {
            return Ok(None);
        };
        if !self.has_table(&table).await? {
            return Ok(None);
        }

        let rows = sqlx::query(&format!(
            r#"SELECT key_ FROM "{table}" WHERE kid = ? ORDER BY id"#
        ))
        .bind(kid_hex(kid))
        .fetch_all(&self.read_pool)
        .await?;

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
