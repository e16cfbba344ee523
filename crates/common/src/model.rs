//! Key and request-context model shared by the key manager and its stores.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// The kind of server a key encrypts traffic for.
///
/// Fetch URI, response format, and redundancy are all chosen by this value.
/// "No type selected" is expressed as `Option<KeyType>`; the numeric code `0`
/// never decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    /// Keys published by auction coordinators (JSON key sets).
    Auction,
    /// Keys published by the join server (raw `application/ohttp-keys`).
    Join,
}

impl KeyType {
    /// Every key type, in code order.
    pub const ALL: [KeyType; 2] = [KeyType::Auction, KeyType::Join];

    /// Stable numeric code used in persisted rows and metrics.
    pub fn code(self) -> i32 {
        match self {
            KeyType::Auction => 1,
            KeyType::Join => 2,
        }
    }

    /// Decode a numeric key type code.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::UnassignedKeyType`] for `0` or any unknown code.
    pub fn from_code(code: i32) -> Result<Self, KeyError> {
        match code {
            1 => Ok(KeyType::Auction),
            2 => Ok(KeyType::Join),
            other => Err(KeyError::UnassignedKeyType(other)),
        }
    }

    /// Upper-case name, as used in logs and metric attributes.
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Auction => "AUCTION",
            KeyType::Join => "JOIN",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single server-issued key, decoded and ready to become an OHTTP key config.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    key_type: KeyType,
    key_identifier: String,
    public_key: Vec<u8>,
}

impl EncryptionKey {
    /// Build a key, rejecting empty public key material.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidKeyFormat`] if `public_key` is empty.
    pub fn new(
        key_type: KeyType,
        key_identifier: impl Into<String>,
        public_key: Vec<u8>,
    ) -> Result<Self, KeyError> {
        if public_key.is_empty() {
            return Err(KeyError::InvalidKeyFormat(format!(
                "{key_type} key has empty public key"
            )));
        }
        Ok(Self {
            key_type,
            key_identifier: key_identifier.into(),
            public_key,
        })
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn key_identifier(&self) -> &str {
        &self.key_identifier
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key_type", &self.key_type)
            .field("key_identifier", &self.key_identifier)
            .field("public_key_len", &self.public_key.len())
            .finish()
    }
}

/// A persisted key row.
///
/// `public_key` keeps the text encoding the server used for its key type
/// (base64 for auction keys, lowercase hex for join key configs). Rows are
/// identified by `(key_type, coordinator_url, key_identifier)`; several rows
/// may share an expiry (key sharding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKey {
    pub key_type: KeyType,
    pub key_identifier: String,
    pub public_key: String,
    #[serde(default)]
    pub coordinator_url: Option<String>,
    pub expiry: DateTime<Utc>,
}

impl StoredKey {
    /// Returns `true` if the key is still usable at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }

    /// Returns `true` if this row lives under the given coordinator scope.
    pub fn in_scope(&self, key_type: KeyType, coordinator_url: Option<&str>) -> bool {
        self.key_type == key_type && self.coordinator_url.as_deref() == coordinator_url
    }
}

/// Decryption state recorded when a request is encrypted.
///
/// Keyed by a caller-chosen `context_id`; read back by the matching decrypt
/// call, possibly after a process restart.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub context_id: i64,
    pub key_type: KeyType,
    pub key_config: Vec<u8>,
    pub encapsulated_shared_secret: Vec<u8>,
    pub seed: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub has_media_type_changed: bool,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secret and seed stay out of logs.
        f.debug_struct("RequestContext")
            .field("context_id", &self.context_id)
            .field("key_type", &self.key_type)
            .field("created_at", &self.created_at)
            .field("has_media_type_changed", &self.has_media_type_changed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn key_type_codes() {
        assert_eq!(KeyType::from_code(1).unwrap(), KeyType::Auction);
        assert_eq!(KeyType::from_code(2).unwrap(), KeyType::Join);
        assert_eq!(
            KeyType::from_code(0).unwrap_err(),
            KeyError::UnassignedKeyType(0)
        );
        for kt in KeyType::ALL {
            assert_eq!(KeyType::from_code(kt.code()).unwrap(), kt);
        }
    }

    #[test]
    fn key_type_serialises_upper_case() {
        assert_eq!(serde_json::to_string(&KeyType::Auction).unwrap(), "\"AUCTION\"");
        assert_eq!(KeyType::Join.to_string(), "JOIN");
    }

    #[test]
    fn encryption_key_rejects_empty_public_key() {
        assert!(EncryptionKey::new(KeyType::Auction, "4b", vec![]).is_err());
        let key = EncryptionKey::new(KeyType::Auction, "4b", b"ABC".to_vec()).unwrap();
        assert_eq!(key.public_key(), b"ABC");
    }

    #[test]
    fn stored_key_activity_and_scope() {
        let now = Utc::now();
        let key = StoredKey {
            key_type: KeyType::Auction,
            key_identifier: "4b".into(),
            public_key: "QUJD".into(),
            coordinator_url: Some("https://coordinator.test".into()),
            expiry: now + Duration::seconds(10),
        };
        assert!(key.is_active_at(now));
        assert!(!key.is_active_at(now + Duration::seconds(10)));
        assert!(key.in_scope(KeyType::Auction, Some("https://coordinator.test")));
        assert!(!key.in_scope(KeyType::Auction, None));
        assert!(!key.in_scope(KeyType::Join, Some("https://coordinator.test")));
    }

    #[test]
    fn request_context_debug_hides_secret() {
        let ctx = RequestContext {
            context_id: 9,
            key_type: KeyType::Join,
            key_config: vec![1, 2],
            encapsulated_shared_secret: vec![0xAA; 4],
            seed: vec![0xBB; 4],
            created_at: Utc::now(),
            has_media_type_changed: false,
        };
        let s = format!("{ctx:?}");
        assert!(s.contains("context_id: 9"));
        assert!(!s.contains("encapsulated_shared_secret"));
        assert!(!s.contains("seed"));
    }
}
