//! Key fetch-and-cache management.
//!
//! # Lookup
//!
//! 1. Resolve the fetch target for the key type and optional coordinator
//!    (see [`routing`]).
//! 2. Query the store for the newest active rows, up to the redundancy count
//!    (sharding for auction keys, one for join keys).
//! 3. On a hit pick one at random. On a miss fetch, persist, prune, and pick
//!    among the fresh rows.
//!
//! Every lookup is bounded by the caller's timeout. Fetch failures are not
//! retried here; the next background pass is the retry.

pub mod encryption_key_manager;
pub mod routing;

pub use encryption_key_manager::EncryptionKeyManager;
pub use routing::{CoordinatorResolver, DefaultUris, FetchTarget, MultiCoordinator, SingleCoordinator};

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{KeyError, KeyType, StoredKey};

use crate::ohttp::KeyConfig;

/// Key lookup and refresh operations.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// A usable key config for `key_type`, fetched only if nothing active is cached.
    async fn get_active_key(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        timeout: Duration,
    ) -> Result<KeyConfig, KeyError>;

    /// The newest stored key config even if it has expired; fetches only when
    /// the scope holds no rows at all.
    async fn get_latest_key(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        timeout: Duration,
    ) -> Result<KeyConfig, KeyError>;

    /// Fetch unconditionally, persist every parsed row, then delete rows of
    /// the same scope with `expiry <= expiry_reference`.
    async fn fetch_and_persist(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        expiry_reference: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<StoredKey>, KeyError>;

    /// Key types with no rows, plus key types with any row expiring by `as_of`.
    async fn absent_or_expiring_key_types(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<BTreeSet<KeyType>, KeyError>;
}

/// Manager behaviour taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    pub auction_key_fetch_uri: String,
    pub join_key_fetch_uri: String,
    pub coordinator_allowlist: Vec<String>,
    pub multi_coordinator_enabled: bool,
    pub auction_key_sharding: usize,
    pub purge_invalid_keys: bool,
}

impl ManagerSettings {
    /// Routing strategy for these settings.
    pub fn resolver(&self) -> Box<dyn CoordinatorResolver> {
        let defaults = DefaultUris {
            auction: self.auction_key_fetch_uri.clone(),
            join: self.join_key_fetch_uri.clone(),
        };
        if self.multi_coordinator_enabled {
            Box::new(MultiCoordinator::new(defaults, self.coordinator_allowlist.clone()))
        } else {
            Box::new(SingleCoordinator::new(defaults))
        }
    }

    /// How many rows are kept and selected between for `key_type`.
    pub fn redundancy(&self, key_type: KeyType) -> usize {
        match key_type {
            KeyType::Auction => self.auction_key_sharding.max(1),
            KeyType::Join => 1,
        }
    }
}
