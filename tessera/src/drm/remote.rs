//! Client for a CDM exposed over HTTP (the `pywidevine serve` API).
//!
//! The device and all licence cryptography stay on the server; this side only
//! shuttles challenges and licences between the server and the service.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use media_tracks::{ContentKey, DrmDescriptor, parse_kid};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use super::cdm::{ChallengeHandler, Cdm};
use super::error::CdmError;

/// Challenge asking the licence server for its service certificate.
pub const SERVICE_CERTIFICATE_CHALLENGE: &[u8] = &[0x08, 0x04];

const SECRET_HEADER: &str = "X-Secret-Key";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: u16,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct OpenData {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct ChallengeData {
    challenge_b64: String,
}

#[derive(Debug, Deserialize)]
struct KeysData {
    keys: Vec<RemoteKey>,
}

#[derive(Debug, Deserialize)]
struct RemoteKey {
    key_id: String,
    key: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone)]
pub struct RemoteCdm {
    host: String,
    secret: String,
    device_name: String,
    client: Client,
}

impl RemoteCdm {
    pub fn new(
        host: impl Into<String>,
        secret: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Result<Self, CdmError> {
        key_vaults::install_rustls_provider();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            host: host.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            device_name: device_name.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.host, self.device_name, path)
    }

    async fn call<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> Result<Option<T>, CdmError> {
        let request = match body {
            Some(body) => self.client.post(self.url(path)).json(&body),
            None => self.client.get(self.url(path)),
        };
        let envelope: Envelope<T> = request
            .header(SECRET_HEADER, &self.secret)
            .send()
            .await?
            .json()
            .await?;
        if envelope.status != 200 {
            return Err(CdmError::other(format!(
                "Remote CDM {path} failed ({}): {}",
                envelope.status, envelope.message
            )));
        }
        Ok(envelope.data)
    }

    async fn open(&self) -> Result<String, CdmError> {
        let data: OpenData = self
            .call("open", None)
            .await?
            .ok_or_else(|| CdmError::other("Remote CDM did not return a session"))?;
        Ok(data.session_id)
    }

    async fn close(&self, session_id: &str) {
        if let Err(e) = self
            .call::<Value>(&format!("close/{session_id}"), None)
            .await
        {
            warn!(session_id, error = %e, "Failed to close remote CDM session");
        }
    }

    async fn run_session(
        &self,
        session_id: &str,
        descriptor: &DrmDescriptor,
        certificate: &dyn ChallengeHandler,
        licence: &dyn ChallengeHandler,
    ) -> Result<BTreeMap<Uuid, ContentKey>, CdmError> {
        let service_certificate = certificate
            .respond(Bytes::from_static(SERVICE_CERTIFICATE_CHALLENGE))
            .await?;
        let privacy_mode = !service_certificate.is_empty();
        if privacy_mode {
            self.call::<Value>(
                "set_service_certificate",
                Some(json!({
                    "session_id": session_id,
                    "certificate": BASE64.encode(&service_certificate),
                })),
            )
            .await?;
        }

        let challenge: ChallengeData = self
            .call(
                "get_license_challenge/STREAMING",
                Some(json!({
                    "session_id": session_id,
                    "init_data": descriptor.pssh.dumps(),
                    "privacy_mode": privacy_mode,
                })),
            )
            .await?
            .ok_or_else(|| CdmError::other("Remote CDM did not return a challenge"))?;
        let challenge = BASE64
            .decode(challenge.challenge_b64)
            .map_err(|e| CdmError::other(format!("Invalid challenge from remote CDM: {e}")))?;

        let licence_message = licence.respond(Bytes::from(challenge)).await?;
        if licence_message.is_empty() {
            return Err(CdmError::EmptyLicense("No License was returned by the server".into()));
        }

        self.call::<Value>(
            "parse_license",
            Some(json!({
                "session_id": session_id,
                "license_message": BASE64.encode(&licence_message),
            })),
        )
        .await?;

        let keys: KeysData = self
            .call("get_keys/CONTENT", Some(json!({ "session_id": session_id })))
            .await?
            .ok_or_else(|| CdmError::other("Remote CDM did not return keys"))?;

        let mut content_keys = BTreeMap::new();
        for key in keys.keys.into_iter().filter(|k| k.kind == "CONTENT") {
            let kid = parse_kid(&key.key_id).map_err(|e| CdmError::other(e.to_string()))?;
            let value = ContentKey::new(&key.key).map_err(|e| CdmError::other(e.to_string()))?;
            content_keys.insert(kid, value);
        }
        if content_keys.is_empty() {
            return Err(CdmError::EmptyLicense(
                "No Content Keys were within the License".into(),
            ));
        }
        Ok(content_keys)
    }
}

#[async_trait]
impl Cdm for RemoteCdm {
    async fn exchange(
        &self,
        descriptor: &DrmDescriptor,
        kids: &[Uuid],
        certificate: &dyn ChallengeHandler,
        licence: &dyn ChallengeHandler,
    ) -> Result<BTreeMap<Uuid, ContentKey>, CdmError> {
        let session_id = self.open().await?;
        debug!(
            device = %self.device_name,
            session_id = %session_id,
            requested = kids.len(),
            "Opened remote CDM session"
        );

        let result = self
            .run_session(&session_id, descriptor, certificate, licence)
            .await;
        self.close(&session_id).await;
        result
    }
}
