//! Remote vault reached over a small JSON HTTP API.
//!
//! ```text
//! GET  {uri}/{service}/{kid}   -> { "code": 0, "content_key": "..." }
//! POST {uri}/{service}/{kid}   <- { "content_key": "..." }
//! POST {uri}/{service}         <- { "content_keys": { "<kid>": "<key>" } }
//! ```
//!
//! Response codes: 0 ok, 2 not found, 3 permission denied, 4 unsupported.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use media_tracks::{ContentKey, kid_hex};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::vault::{KeyVault, VaultWrite};

const CODE_OK: i64 = 0;
const CODE_NOT_FOUND: i64 = 2;
const CODE_PERMISSION_DENIED: i64 = 3;
const CODE_UNSUPPORTED: i64 = 4;

/// Install the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    content_key: Option<String>,
    #[serde(default)]
    inserted: Option<usize>,
}

#[derive(Serialize)]
struct AddKeyRequest<'a> {
    content_key: &'a str,
}

#[derive(Serialize)]
struct AddKeysRequest {
    content_keys: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct ApiVault {
    name: String,
    uri: String,
    token: String,
    client: Client,
    write_lock: Mutex<()>,
}

impl ApiVault {
    pub fn new(name: impl Into<String>, uri: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        install_rustls_provider();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(name, uri, token, client))
    }

    pub fn with_client(
        name: impl Into<String>,
        uri: impl Into<String>,
        token: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            name: name.into(),
            uri: uri.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
            write_lock: Mutex::new(()),
        }
    }

    fn endpoint(&self, service: &str, kid: Option<&Uuid>) -> String {
        match kid {
            Some(kid) => format!("{}/{}/{}", self.uri, service, kid_hex(kid)),
            None => format!("{}/{}", self.uri, service),
        }
    }

    /// Interpret a write response; transport-level refusals become typed outcomes.
    ///
    /// Servers that omit `inserted` are assumed to have stored `requested` rows.
    async fn write_outcome(&self, response: Response, requested: usize) -> Result<VaultWrite> {
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Ok(VaultWrite::PermissionDenied);
            }
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
                return Ok(VaultWrite::Unsupported);
            }
            _ => {}
        }

        let body: ApiResponse = response.json().await?;
        match body.code {
            CODE_OK => Ok(VaultWrite::Stored(body.inserted.unwrap_or(requested))),
            CODE_PERMISSION_DENIED => Ok(VaultWrite::PermissionDenied),
            CODE_UNSUPPORTED => Ok(VaultWrite::Unsupported),
            code => Err(VaultError::api(code, body.message.unwrap_or_default())),
        }
    }
}

#[async_trait]
impl KeyVault for ApiVault {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_key(&self, kid: &Uuid, service: &str) -> Result<Option<ContentKey>> {
        let response = self
            .client
            .get(self.endpoint(service, Some(kid)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(VaultError::api(
                i64::from(status.as_u16()),
                status.canonical_reason().unwrap_or("request failed"),
            ));
        }

        let body: ApiResponse = response.json().await?;
        match body.code {
            CODE_OK => match body.content_key {
                Some(key) => Ok(Some(ContentKey::new(key)?)),
                None => Ok(None),
            },
            CODE_NOT_FOUND => Ok(None),
            code => Err(VaultError::api(code, body.message.unwrap_or_default())),
        }
    }

    async fn add_key(&self, service: &str, kid: &Uuid, key: &ContentKey) -> Result<VaultWrite> {
        let _guard = self.write_lock.lock().await;
        let response = self
            .client
            .post(self.endpoint(service, Some(kid)))
            .bearer_auth(&self.token)
            .json(&AddKeyRequest {
                content_key: key.as_str(),
            })
            .send()
            .await?;
        self.write_outcome(response, 1).await
    }

    async fn add_keys(
        &self,
        service: &str,
        keys: &BTreeMap<Uuid, ContentKey>,
    ) -> Result<VaultWrite> {
        let content_keys: BTreeMap<String, String> = keys
            .iter()
            .filter(|(_, key)| !key.is_placeholder())
            .map(|(kid, key)| (kid_hex(kid), key.to_string()))
            .collect();
        if content_keys.is_empty() {
            return Ok(VaultWrite::Stored(0));
        }

        let requested = content_keys.len();
        let _guard = self.write_lock.lock().await;
        let response = self
            .client
            .post(self.endpoint(service, None))
            .bearer_auth(&self.token)
            .json(&AddKeysRequest { content_keys })
            .send()
            .await?;
        self.write_outcome(response, requested).await
    }
}
