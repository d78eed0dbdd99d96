//! DRM descriptors attached to tracks: protection header, required key ids,
//! and the incrementally filled key map.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, EnumString};
use uuid::{Uuid, uuid};

use crate::error::TrackError;

pub const WIDEVINE_SYSTEM_ID: Uuid = uuid!("edef8ba9-79d6-4ace-a3c8-27dcd51d21ed");
pub const PLAYREADY_SYSTEM_ID: Uuid = uuid!("9a04f079-9840-4286-ab92-e65be0885f95");
pub const COMMON_SYSTEM_ID: Uuid = uuid!("1077efec-c0b2-4d02-ace3-3c1e52e2fb4b");

/// Protection scheme of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum DrmScheme {
    /// Keys obtained through a licence exchange with a CDM.
    Widevine,
    /// Keys delivered in the clear alongside the manifest.
    ClearKey,
}

impl DrmScheme {
    /// Whether keys for this scheme must be obtained through a CDM.
    pub fn requires_cdm(&self) -> bool {
        matches!(self, Self::Widevine)
    }
}

/// Render a key id the way vaults and export files store it (32 lowercase hex digits).
pub fn kid_hex(kid: &Uuid) -> String {
    kid.simple().to_string()
}

/// Parse a key id from hex, with or without hyphens.
pub fn parse_kid(input: &str) -> Result<Uuid, TrackError> {
    Uuid::parse_str(input.trim()).map_err(|_| TrackError::InvalidKid(input.to_string()))
}

/// A content decryption key, stored as lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    pub fn new(hex_key: impl AsRef<str>) -> Result<Self, TrackError> {
        let input = hex_key.as_ref().trim();
        if input.is_empty() {
            return Err(TrackError::invalid_content_key(input, "empty key"));
        }
        hex::decode(input).map_err(|e| TrackError::invalid_content_key(input, e.to_string()))?;
        Ok(Self(input.to_ascii_lowercase()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // validated on construction
        hex::decode(&self.0).unwrap_or_default()
    }

    /// All-zero keys are placeholders some services return for keys they will
    /// not hand out; they never count as a resolved key.
    pub fn is_placeholder(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }
}

impl TryFrom<String> for ContentKey {
    type Error = TrackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentKey> for String {
    fn from(value: ContentKey) -> Self {
        value.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({})", self.0)
    }
}

/// A protection system specific header (ISO/IEC 23001-7 `pssh` box).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pssh {
    system_id: Uuid,
    version: u8,
    box_key_ids: Vec<Uuid>,
    data: Vec<u8>,
}

impl Pssh {
    /// A version 0 box carrying `data` for `system_id`.
    pub fn new(system_id: Uuid, data: impl Into<Vec<u8>>) -> Self {
        Self {
            system_id,
            version: 0,
            box_key_ids: Vec::new(),
            data: data.into(),
        }
    }

    /// A version 1 box listing key ids in the box header.
    pub fn with_key_ids(system_id: Uuid, key_ids: Vec<Uuid>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            system_id,
            version: 1,
            box_key_ids: key_ids,
            data: data.into(),
        }
    }

    /// Parse a full `pssh` box, or bare Widevine init data.
    pub fn parse(bytes: &[u8]) -> Result<Self, TrackError> {
        if bytes.len() < 8 || &bytes[4..8] != b"pssh" {
            return Ok(Self::new(WIDEVINE_SYSTEM_ID, bytes.to_vec()));
        }

        let mut reader = ByteReader::new(bytes);
        let size = reader.u32()? as usize;
        if size != bytes.len() {
            return Err(TrackError::invalid_pssh(format!(
                "box size {size} does not match buffer length {}",
                bytes.len()
            )));
        }
        reader.take(4)?;
        let version = reader.u8()?;
        reader.take(3)?;
        let system_id = Uuid::from_slice(reader.take(16)?)
            .map_err(|e| TrackError::invalid_pssh(e.to_string()))?;

        let mut box_key_ids = Vec::new();
        if version > 0 {
            let count = reader.u32()?;
            for _ in 0..count {
                let kid = Uuid::from_slice(reader.take(16)?)
                    .map_err(|e| TrackError::invalid_pssh(e.to_string()))?;
                box_key_ids.push(kid);
            }
        }

        let data_size = reader.u32()? as usize;
        let data = reader.take(data_size)?.to_vec();

        Ok(Self {
            system_id,
            version,
            box_key_ids,
            data,
        })
    }

    pub fn from_base64(input: &str) -> Result<Self, TrackError> {
        let bytes = BASE64
            .decode(input.trim())
            .map_err(|e| TrackError::invalid_pssh(e.to_string()))?;
        Self::parse(&bytes)
    }

    pub fn system_id(&self) -> Uuid {
        self.system_id
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn init_data(&self) -> &[u8] {
        &self.data
    }

    /// Serialise to a full `pssh` box.
    pub fn to_bytes(&self) -> Vec<u8> {
        let kid_len = if self.version > 0 {
            4 + 16 * self.box_key_ids.len()
        } else {
            0
        };
        let size = 8 + 4 + 16 + kid_len + 4 + self.data.len();

        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&(size as u32).to_be_bytes());
        out.extend_from_slice(b"pssh");
        out.push(self.version);
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(self.system_id.as_bytes());
        if self.version > 0 {
            out.extend_from_slice(&(self.box_key_ids.len() as u32).to_be_bytes());
            for kid in &self.box_key_ids {
                out.extend_from_slice(kid.as_bytes());
            }
        }
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Base64 of the full box, the form shown to users and sent to CDMs.
    pub fn dumps(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Key ids from the box header and, for Widevine, from the init data.
    pub fn key_ids(&self) -> Vec<Uuid> {
        let mut kids = self.box_key_ids.clone();
        if self.system_id == WIDEVINE_SYSTEM_ID {
            for kid in widevine_key_ids(&self.data) {
                if !kids.contains(&kid) {
                    kids.push(kid);
                }
            }
        }
        kids
    }
}

impl Serialize for Pssh {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.dumps())
    }
}

impl<'de> Deserialize<'de> for Pssh {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_base64(&value).map_err(serde::de::Error::custom)
    }
}

/// Pull `key_id` (field 2) entries out of a `WidevinePsshData` message.
fn widevine_key_ids(data: &[u8]) -> Vec<Uuid> {
    let mut kids = Vec::new();
    let mut reader = ByteReader::new(data);

    while !reader.is_empty() {
        let Some(tag) = reader.varint() else { break };
        let field = tag >> 3;
        let parsed = match tag & 0x7 {
            0 => reader.varint().map(|_| ()),
            1 => reader.take(8).ok().map(|_| ()),
            2 => reader.varint().and_then(|len| {
                let bytes = reader.take(len as usize).ok()?;
                if field == 2 && bytes.len() == 16 {
                    kids.extend(Uuid::from_slice(bytes).ok());
                }
                Some(())
            }),
            5 => reader.take(4).ok().map(|_| ()),
            _ => None,
        };
        if parsed.is_none() {
            break;
        }
    }

    kids
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TrackError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| TrackError::invalid_pssh("unexpected end of data"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, TrackError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, TrackError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn varint(&mut self) -> Option<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self.buf.get(self.pos)?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Some(value);
            }
        }
        None
    }
}

/// Per-track DRM metadata: scheme, header, required key ids and resolved keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrmDescriptor {
    pub scheme: DrmScheme,
    pub pssh: Pssh,
    pub kids: Vec<Uuid>,
    #[serde(default)]
    pub content_keys: BTreeMap<Uuid, ContentKey>,
}

impl DrmDescriptor {
    pub fn new(scheme: DrmScheme, pssh: Pssh, kids: impl IntoIterator<Item = Uuid>) -> Self {
        let mut unique = Vec::new();
        for kid in kids {
            if !unique.contains(&kid) {
                unique.push(kid);
            }
        }
        Self {
            scheme,
            pssh,
            kids: unique,
            content_keys: BTreeMap::new(),
        }
    }

    /// Build a descriptor whose key ids are taken from the header itself.
    pub fn from_pssh(scheme: DrmScheme, pssh: Pssh) -> Self {
        let kids = pssh.key_ids();
        Self::new(scheme, pssh, kids)
    }

    pub fn with_key(mut self, kid: Uuid, key: ContentKey) -> Self {
        self.insert_key(kid, key);
        self
    }

    /// Whether a real (non-placeholder) key is known for `kid`.
    pub fn has_key(&self, kid: &Uuid) -> bool {
        self.content_keys
            .get(kid)
            .is_some_and(|key| !key.is_placeholder())
    }

    /// Store a key, replacing any previous value for the same key id.
    pub fn insert_key(&mut self, kid: Uuid, key: ContentKey) -> Option<ContentKey> {
        self.content_keys.insert(kid, key)
    }

    /// Required key ids with no real key yet.
    pub fn unresolved_kids(&self) -> Vec<Uuid> {
        self.kids
            .iter()
            .filter(|kid| !self.has_key(kid))
            .copied()
            .collect()
    }

    pub fn is_resolved(&self) -> bool {
        self.kids.iter().all(|kid| self.has_key(kid))
    }

    /// Known keys, skipping placeholders.
    pub fn resolved_keys(&self) -> impl Iterator<Item = (&Uuid, &ContentKey)> {
        self.content_keys
            .iter()
            .filter(|(_, key)| !key.is_placeholder())
    }
}

/// The default key id from the first `tenc` box of an init segment.
pub fn tenc_kid(init: &[u8]) -> Option<Uuid> {
    let pos = init.windows(4).position(|w| w == b"tenc")?;
    // full box header (4), reserved (1), crypt/skip (1), protected (1), IV size (1)
    let start = pos + 4 + 8;
    let kid = Uuid::from_slice(init.get(start..start + 16)?).ok()?;
    (!kid.is_nil()).then_some(kid)
}
