//! Content key vaults.
//!
//! A [`KeyVault`] stores content keys per (service, KID). [`Vaults`] layers
//! several of them in priority order: lookups return the first real key,
//! writes fan out to every vault and absorb per-vault refusals.

pub mod api;
pub mod config;
pub mod error;
pub mod mysql;
pub mod pool;
pub mod sqlite;
pub mod vault;

pub use api::{ApiVault, install_rustls_provider};
pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use mysql::{MySqlConfig, MySqlVault};
pub use pool::Vaults;
pub use sqlite::SqliteVault;
pub use vault::{KeyVault, VaultWrite};
