//! Per-key-type translation between fetch responses, stored rows, and OHTTP
//! key configs.
//!
//! Each [`KeyType`] has exactly one [`KeyParser`]; the [`ParserRegistry`] is
//! built once at startup and shared by the manager and the encryptor.

pub mod auction;
pub mod join;

pub use auction::AuctionKeyParser;
pub use join::JoinKeyParser;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::protocol::FetchResponse;
use common::{EncryptionKey, KeyError, KeyType, StoredKey};

use crate::ohttp::KeyConfig;

/// Format-specific handling for one key type.
pub trait KeyParser: Send + Sync {
    fn key_type(&self) -> KeyType;

    /// Headers to send with the key fetch.
    fn request_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Turn a raw response into rows, with expiries relative to `now`.
    ///
    /// Rows carry no coordinator; the caller stamps the scope it fetched from.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::MalformedResponse`] when the format demands a hard
    /// failure. Formats that tolerate bad input return an empty list instead.
    fn parse_fetch_response(
        &self,
        response: &FetchResponse,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredKey>, KeyError>;

    /// Decode the text encoding of a stored row.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidKeyFormat`] if the stored key does not decode.
    fn to_encryption_key(&self, stored: &StoredKey) -> Result<EncryptionKey, KeyError>;

    /// Build the OHTTP key config for a decoded key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidKeyFormat`] if the key cannot form a valid config.
    fn to_key_config(&self, key: &EncryptionKey) -> Result<KeyConfig, KeyError>;

    /// `to_encryption_key` followed by `to_key_config`.
    fn stored_to_key_config(&self, stored: &StoredKey) -> Result<KeyConfig, KeyError> {
        let key = self.to_encryption_key(stored)?;
        self.to_key_config(&key)
    }
}

/// Lookup table from key type to its parser.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: HashMap<KeyType, Arc<dyn KeyParser>>,
}

impl ParserRegistry {
    /// Registry holding the auction and join parsers, both falling back to
    /// `default_max_age` for key lifetime.
    pub fn new(default_max_age: chrono::Duration) -> Self {
        Self::from_parsers([
            Arc::new(AuctionKeyParser::new(default_max_age)) as Arc<dyn KeyParser>,
            Arc::new(JoinKeyParser::new(default_max_age)),
        ])
    }

    /// Build from explicit parsers; a later parser for the same type wins.
    pub fn from_parsers(parsers: impl IntoIterator<Item = Arc<dyn KeyParser>>) -> Self {
        Self {
            parsers: parsers.into_iter().map(|p| (p.key_type(), p)).collect(),
        }
    }

    /// # Errors
    ///
    /// Returns [`KeyError::InvalidKeyFormat`] if no parser handles `key_type`.
    pub fn get(&self, key_type: KeyType) -> Result<&dyn KeyParser, KeyError> {
        self.parsers
            .get(&key_type)
            .map(|p| &**p)
            .ok_or_else(|| KeyError::InvalidKeyFormat(format!("no parser registered for {key_type}")))
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.parsers.keys().collect();
        types.sort();
        f.debug_struct("ParserRegistry").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_key_type() {
        let registry = ParserRegistry::new(chrono::Duration::days(14));
        for kt in KeyType::ALL {
            assert_eq!(registry.get(kt).unwrap().key_type(), kt);
        }
    }

    #[test]
    fn missing_parser_is_an_error() {
        let registry = ParserRegistry::from_parsers([
            Arc::new(JoinKeyParser::new(chrono::Duration::days(1))) as Arc<dyn KeyParser>,
        ]);
        assert!(registry.get(KeyType::Auction).is_err());
        assert!(registry.get(KeyType::Join).is_ok());
    }
}
