//! DRM key resolution.
//!
//! The broker resolves a track's content keys through:
//! - the vault pool, warming every other vault on a hit
//! - a single licence exchange with a CDM for whatever is left
//! - an optional JSON export of every key it resolved

mod broker;
mod cdm;
mod error;
mod events;
mod export;
mod remote;
mod service;

pub use broker::{KeyBroker, KeyMode};
pub use cdm::{Cdm, ChallengeHandler};
pub use error::{CdmError, DrmError, ExportError};
pub use events::{DrmEvents, NoDrmEvents};
pub use export::KeyExport;
pub use remote::{RemoteCdm, SERVICE_CERTIFICATE_CHALLENGE};
pub use service::LicenseService;
