//! tessera library crate.
//!
//! Resolves DRM content keys through a pool of key vaults and a CDM, selects
//! a title's tracks against user criteria, and downloads them concurrently.

pub mod config;
pub mod downloader;
pub mod drm;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
