//! [`EncryptionKeyManager`]: the store-backed [`KeyManager`].

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{KeyError, KeyType, StoredKey};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{CoordinatorResolver, FetchTarget, KeyManager, ManagerSettings};
use crate::clock::Clock;
use crate::fetch::{FetchRequest, KeyFetcher};
use crate::metrics::{CoordinatorSource, FetchSource, KeyFetchEvent, StatusSink};
use crate::ohttp::KeyConfig;
use crate::parser::ParserRegistry;
use crate::store::KeyStore;

/// Caches fetched keys in a [`KeyStore`] and selects among them.
///
/// The routing strategy is fixed at construction from [`ManagerSettings`].
pub struct EncryptionKeyManager {
    settings: ManagerSettings,
    resolver: Box<dyn CoordinatorResolver>,
    parsers: ParserRegistry,
    store: Arc<dyn KeyStore>,
    fetcher: Arc<dyn KeyFetcher>,
    clock: Arc<dyn Clock>,
    status: Arc<dyn StatusSink>,
    rng: Mutex<StdRng>,
}

impl EncryptionKeyManager {
    pub fn new(
        settings: ManagerSettings,
        parsers: ParserRegistry,
        store: Arc<dyn KeyStore>,
        fetcher: Arc<dyn KeyFetcher>,
        clock: Arc<dyn Clock>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let resolver = settings.resolver();
        Self {
            settings,
            resolver,
            parsers,
            store,
            fetcher,
            clock,
            status,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the selection RNG, e.g. with a seeded one.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    async fn lookup_active(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
    ) -> Result<KeyConfig, KeyError> {
        let target = self.resolver.resolve(key_type, coordinator_url)?;
        let n = self.settings.redundancy(key_type);
        let now = self.clock.now();

        let cached = self
            .store
            .latest_active(key_type, target.scope(), now, n)
            .await?;
        if !cached.is_empty() {
            debug!(key_type = %key_type, candidates = cached.len(), "using cached key");
            return self.select(key_type, cached).await;
        }

        let reason = match self
            .fetch_into_store(key_type, &target, now, FetchSource::OnDemand)
            .await
        {
            Ok(fetched) => {
                let mut active: Vec<_> = fetched.into_iter().filter(|k| k.is_active_at(now)).collect();
                active.truncate(n);
                if !active.is_empty() {
                    return self.select(key_type, active).await;
                }
                "fetch returned no usable key".to_string()
            }
            Err(e) => e.to_string(),
        };

        // Another caller may have persisted a key while this fetch ran.
        let fallback = self
            .store
            .latest_active(key_type, target.scope(), self.clock.now(), n)
            .await?;
        if fallback.is_empty() {
            warn!(key_type = %key_type, reason = %reason, "no key fetched and none is cached");
            return Err(KeyError::NoKeyAvailable { key_type, reason });
        }
        debug!(key_type = %key_type, reason = %reason, "fetch yielded no key; using concurrently stored key");
        self.select(key_type, fallback).await
    }

    async fn lookup_latest(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
    ) -> Result<KeyConfig, KeyError> {
        let target = self.resolver.resolve(key_type, coordinator_url)?;
        let n = self.settings.redundancy(key_type);

        let stored = self.store.latest_by_expiry(key_type, target.scope(), n).await?;
        if !stored.is_empty() {
            return self.select(key_type, stored).await;
        }

        let mut fetched = self
            .fetch_into_store(key_type, &target, self.clock.now(), FetchSource::OnDemand)
            .await?;
        fetched.sort_by(|a, b| b.expiry.cmp(&a.expiry));
        fetched.truncate(n);
        if fetched.is_empty() {
            return Err(KeyError::NoKeyAvailable {
                key_type,
                reason: "fetch returned no usable key".into(),
            });
        }
        self.select(key_type, fetched).await
    }

    /// Fetch, parse, persist, prune; reports the outcome to the status sink.
    async fn fetch_into_store(
        &self,
        key_type: KeyType,
        target: &FetchTarget,
        expiry_reference: DateTime<Utc>,
        source: FetchSource,
    ) -> Result<Vec<StoredKey>, KeyError> {
        let started = Instant::now();
        let result = self.fetch_parse_persist(key_type, target, expiry_reference).await;
        self.status.key_fetched(&KeyFetchEvent {
            key_type,
            source,
            coordinator_source: if target.from_allowlist {
                CoordinatorSource::AllowList
            } else {
                CoordinatorSource::Default
            },
            error_code: result.as_ref().err().map(KeyError::code),
            keys: result.as_ref().map_or(0, Vec::len),
            latency: started.elapsed(),
        });
        result
    }

    async fn fetch_parse_persist(
        &self,
        key_type: KeyType,
        target: &FetchTarget,
        expiry_reference: DateTime<Utc>,
    ) -> Result<Vec<StoredKey>, KeyError> {
        let parser = self.parsers.get(key_type)?;

        let request = parser
            .request_headers()
            .into_iter()
            .fold(FetchRequest::get(&target.uri), |req, (name, value)| {
                req.with_header(name, value)
            });
        let response = self.fetcher.fetch(request).await?;

        let mut keys = parser.parse_fetch_response(&response, self.clock.now())?;
        for key in &mut keys {
            key.coordinator_url = target.coordinator_url.clone();
        }

        if !keys.is_empty() {
            self.store.insert_all(keys.clone()).await?;
        }
        let pruned = self
            .store
            .delete_expired(key_type, target.scope(), expiry_reference)
            .await?;

        info!(
            key_type = %key_type,
            keys = keys.len(),
            pruned,
            from_allowlist = target.from_allowlist,
            "keys fetched and persisted"
        );
        Ok(keys)
    }

    /// Pick one candidate uniformly and build its key config.
    async fn select(
        &self,
        key_type: KeyType,
        candidates: Vec<StoredKey>,
    ) -> Result<KeyConfig, KeyError> {
        let chosen = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            candidates.choose(&mut *rng).cloned()
        };
        let Some(chosen) = chosen else {
            return Err(KeyError::NoKeyAvailable {
                key_type,
                reason: "no candidate keys".into(),
            });
        };

        let parser = self.parsers.get(key_type)?;
        match parser.stored_to_key_config(&chosen) {
            Ok(config) => Ok(config),
            Err(e @ KeyError::InvalidKeyFormat(_)) => {
                warn!(key_type = %key_type, key_id = %chosen.key_identifier, error = %e, "stored key is unusable");
                if self.settings.purge_invalid_keys {
                    if let Err(del) = self
                        .store
                        .delete_key(key_type, chosen.coordinator_url.as_deref(), &chosen.key_identifier)
                        .await
                    {
                        error!(key_type = %key_type, error = %del, "failed to purge unusable key");
                    }
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl KeyManager for EncryptionKeyManager {
    async fn get_active_key(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        timeout: Duration,
    ) -> Result<KeyConfig, KeyError> {
        tokio::time::timeout(timeout, self.lookup_active(key_type, coordinator_url))
            .await
            .map_err(|_| {
                warn!(key_type = %key_type, timeout_ms = timeout.as_millis() as u64, "key lookup timed out");
                KeyError::Timeout(timeout)
            })?
    }

    async fn get_latest_key(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        timeout: Duration,
    ) -> Result<KeyConfig, KeyError> {
        tokio::time::timeout(timeout, self.lookup_latest(key_type, coordinator_url))
            .await
            .map_err(|_| KeyError::Timeout(timeout))?
    }

    async fn fetch_and_persist(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        expiry_reference: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<StoredKey>, KeyError> {
        let target = self.resolver.resolve(key_type, coordinator_url)?;
        tokio::time::timeout(
            timeout,
            self.fetch_into_store(key_type, &target, expiry_reference, FetchSource::Background),
        )
        .await
        .map_err(|_| KeyError::Timeout(timeout))?
    }

    async fn absent_or_expiring_key_types(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<BTreeSet<KeyType>, KeyError> {
        let present = self.store.key_types_present().await?;
        let mut types = self.store.key_types_with_expired(as_of).await?;
        types.extend(KeyType::ALL.into_iter().filter(|kt| !present.contains(kt)));
        Ok(types)
    }
}
