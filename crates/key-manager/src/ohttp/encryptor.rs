//! [`ObliviousHttpEncryptor`]: seals requests with a managed key and opens
//! the responses later using the persisted request context.
//!
//! Per request: encrypt persists the context before returning ciphertext, so
//! a decrypt with the same id can run on any later call path, including after
//! a restart when the context store is durable.

use std::sync::Arc;
use std::time::Duration;

use common::{KeyError, KeyType, RequestContext};
use tracing::{debug, warn};

use super::{KeyConfig, MediaType, ObliviousHttpClient, RequestSecrets};
use crate::clock::Clock;
use crate::manager::KeyManager;
use crate::store::ContextStore;

/// Request-encryption behaviour, projected from the service configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptorSettings {
    /// Seal auction requests with the auction media-type labels.
    pub media_type_change_enabled: bool,
}

pub struct ObliviousHttpEncryptor {
    manager: Arc<dyn KeyManager>,
    client: Arc<dyn ObliviousHttpClient>,
    contexts: Arc<dyn ContextStore>,
    clock: Arc<dyn Clock>,
    media_type_change_enabled: bool,
}

impl ObliviousHttpEncryptor {
    pub fn new(
        manager: Arc<dyn KeyManager>,
        client: Arc<dyn ObliviousHttpClient>,
        contexts: Arc<dyn ContextStore>,
        clock: Arc<dyn Clock>,
        settings: EncryptorSettings,
    ) -> Self {
        Self {
            manager,
            client,
            contexts,
            clock,
            media_type_change_enabled: settings.media_type_change_enabled,
        }
    }

    /// Join traffic always uses the bhttp labels.
    fn media_type_for(&self, key_type: KeyType) -> MediaType {
        match key_type {
            KeyType::Auction if self.media_type_change_enabled => MediaType::Auction,
            _ => MediaType::Bhttp,
        }
    }

    /// Seal `plaintext` with an active key and remember how to open the reply.
    ///
    /// `timeout` bounds the key lookup, including any fetch it triggers.
    ///
    /// # Errors
    ///
    /// Propagates key lookup errors, returns [`KeyError::EncryptionFailed`]
    /// if sealing fails and [`KeyError::Storage`] if the context cannot be
    /// persisted. No ciphertext is returned without a persisted context.
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        context_id: i64,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<u8>, KeyError> {
        let config = self
            .manager
            .get_active_key(key_type, coordinator_url, timeout)
            .await?;

        let media_type = self.media_type_for(key_type);
        let sealed = self
            .client
            .encrypt_request(&config, plaintext, media_type)
            .map_err(|e| KeyError::EncryptionFailed(e.to_string()))?;

        let context = RequestContext {
            context_id,
            key_type,
            key_config: config.serialize(),
            encapsulated_shared_secret: sealed.secrets.encapsulated_shared_secret,
            seed: sealed.secrets.seed,
            created_at: self.clock.now(),
            has_media_type_changed: media_type == MediaType::Auction,
        };
        self.contexts.put_context(context).await?;

        debug!(context_id, key_type = %key_type, key_id = config.key_id(), "request encrypted");
        Ok(sealed.ciphertext)
    }

    /// Open a response with the context recorded by [`Self::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::ContextNotFound`] for an id that was never
    /// encrypted, [`KeyError::InvalidKeyFormat`] if the stored key config no
    /// longer parses, and [`KeyError::DecryptionFailed`] if opening fails.
    pub async fn decrypt(&self, ciphertext: &[u8], context_id: i64) -> Result<Vec<u8>, KeyError> {
        let context = self
            .contexts
            .get_context(context_id)
            .await?
            .ok_or(KeyError::ContextNotFound(context_id))?;

        let config = KeyConfig::parse(&context.key_config)?;
        let media_type = if context.has_media_type_changed {
            MediaType::Auction
        } else {
            MediaType::Bhttp
        };
        let secrets = RequestSecrets {
            encapsulated_shared_secret: context.encapsulated_shared_secret,
            seed: context.seed,
        };

        self.client
            .decrypt_response(&config, ciphertext, &secrets, media_type)
            .map_err(|e| {
                warn!(context_id, error = %e, "response decryption failed");
                KeyError::DecryptionFailed(e.to_string())
            })
    }
}


#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use common::StoredKey;

    use super::testing::XorClient;
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::MemoryStore;

    /// Serves one fixed config per key type.
    struct FixedKeys;

    fn config_for(key_type: KeyType) -> KeyConfig {
        let id = match key_type {
            KeyType::Auction => 0x4b,
            KeyType::Join => 0x04,
        };
        KeyConfig::x25519(id, &[9u8; 32]).unwrap()
    }

    #[async_trait]
    impl KeyManager for FixedKeys {
        async fn get_active_key(
            &self,
            key_type: KeyType,
            _coordinator_url: Option<&str>,
            _timeout: Duration,
        ) -> Result<KeyConfig, KeyError> {
            Ok(config_for(key_type))
        }

        async fn get_latest_key(
            &self,
            key_type: KeyType,
            _coordinator_url: Option<&str>,
            _timeout: Duration,
        ) -> Result<KeyConfig, KeyError> {
            Ok(config_for(key_type))
        }

        async fn fetch_and_persist(
            &self,
            _key_type: KeyType,
            _coordinator_url: Option<&str>,
            _expiry_reference: DateTime<Utc>,
            _timeout: Duration,
        ) -> Result<Vec<StoredKey>, KeyError> {
            Ok(Vec::new())
        }

        async fn absent_or_expiring_key_types(
            &self,
            _as_of: DateTime<Utc>,
        ) -> Result<BTreeSet<KeyType>, KeyError> {
            Ok(BTreeSet::new())
        }
    }

    fn encryptor(store: MemoryStore, media_type_change_enabled: bool) -> ObliviousHttpEncryptor {
        ObliviousHttpEncryptor::new(
            Arc::new(FixedKeys),
            Arc::new(XorClient),
            Arc::new(store),
            Arc::new(SystemClock),
            EncryptorSettings {
                media_type_change_enabled,
            },
        )
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn round_trip_through_persisted_context() {
        let store = MemoryStore::new();
        let enc = encryptor(store.clone(), false);

        let ciphertext = enc
            .encrypt(b"bid request", 42, KeyType::Auction, None, TIMEOUT)
            .await
            .unwrap();
        assert_ne!(ciphertext, b"bid request");

        let ctx = store.get_context(42).await.unwrap().unwrap();
        assert_eq!(ctx.key_type, KeyType::Auction);
        assert!(!ctx.has_media_type_changed);
        assert_eq!(KeyConfig::parse(&ctx.key_config).unwrap().key_id(), 0x4b);

        // A fresh encryptor over the same store can still open the reply.
        let other = encryptor(store, false);
        assert_eq!(other.decrypt(&ciphertext, 42).await.unwrap(), b"bid request");
    }

    #[tokio::test]
    async fn unknown_context_is_reported() {
        let enc = encryptor(MemoryStore::new(), false);
        let err = enc.decrypt(b"anything", 1234).await.unwrap_err();
        assert_eq!(err, KeyError::ContextNotFound(1234));
    }

    #[tokio::test]
    async fn media_type_change_applies_to_auction_only() {
        let store = MemoryStore::new();
        let enc = encryptor(store.clone(), true);

        let auction = enc
            .encrypt(b"a", 1, KeyType::Auction, None, TIMEOUT)
            .await
            .unwrap();
        let join = enc.encrypt(b"j", 2, KeyType::Join, None, TIMEOUT).await.unwrap();

        assert!(store.get_context(1).await.unwrap().unwrap().has_media_type_changed);
        assert!(!store.get_context(2).await.unwrap().unwrap().has_media_type_changed);
        assert_eq!(enc.decrypt(&auction, 1).await.unwrap(), b"a");
        assert_eq!(enc.decrypt(&join, 2).await.unwrap(), b"j");
    }

    #[tokio::test]
    async fn mismatched_ciphertext_fails_decryption() {
        let enc = encryptor(MemoryStore::new(), false);
        enc.encrypt(b"x", 5, KeyType::Join, None, TIMEOUT).await.unwrap();
        let err = enc.decrypt(&[0xff, 0x00, 0x01], 5).await.unwrap_err();
        assert_eq!(err.code(), "decryption_failed");
    }

    #[tokio::test]
    async fn reused_context_id_keeps_last_request() {
        let store = MemoryStore::new();
        let enc = encryptor(store.clone(), true);
        enc.encrypt(b"first", 9, KeyType::Join, None, TIMEOUT).await.unwrap();
        let second = enc
            .encrypt(b"second", 9, KeyType::Auction, None, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(store.get_context(9).await.unwrap().unwrap().key_type, KeyType::Auction);
        assert_eq!(enc.decrypt(&second, 9).await.unwrap(), b"second");
    }
}
