//! The CDM capability consumed by the key broker.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use media_tracks::{ContentKey, DrmDescriptor};
use uuid::Uuid;

use super::error::CdmError;

/// Answers an opaque challenge produced by the CDM.
///
/// The broker builds these from the service's licence endpoints, bound to the
/// title and track being resolved.
#[async_trait]
pub trait ChallengeHandler: Send + Sync {
    async fn respond(&self, challenge: Bytes) -> Result<Bytes, CdmError>;
}

/// A content decryption module able to run a licence exchange.
///
/// Implementations must be safe to call concurrently; the broker does not
/// deduplicate identical in-flight exchanges.
#[async_trait]
pub trait Cdm: Send + Sync + fmt::Debug {
    /// Run one licence exchange for `descriptor`, asking for `kids`.
    ///
    /// `certificate` is called first with the service certificate challenge;
    /// an empty response means the service does not use privacy mode.
    /// `licence` is called with the licence challenge. Returns every key the
    /// licence carried, which may be more or fewer than requested.
    async fn exchange(
        &self,
        descriptor: &DrmDescriptor,
        kids: &[Uuid],
        certificate: &dyn ChallengeHandler,
        licence: &dyn ChallengeHandler,
    ) -> Result<BTreeMap<Uuid, ContentKey>, CdmError>;
}
