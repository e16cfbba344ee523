//! Persistence for fetched keys and request contexts.
//!
//! Two backends implement both [`KeyStore`] and [`ContextStore`]:
//! - [`MemoryStore`]: process-local maps behind a `tokio::sync::RwLock`.
//! - [`RedbStore`]: a single redb file, so contexts survive restarts between
//!   encrypt and decrypt.
//!
//! Every method is atomic on its own. Rows are identified by
//! `(key_type, coordinator_url, key_identifier)`; inserting an existing
//! identity replaces the row.

pub mod memory;
pub mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{KeyError, KeyType, RequestContext, StoredKey};
use thiserror::Error;

/// Errors produced by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected an operation.
    #[error("database error: {0}")]
    Backend(String),

    /// A row could not be encoded or decoded.
    #[error("row codec error: {0}")]
    Codec(String),

    /// The blocking task running the operation did not finish.
    #[error("store task failed: {0}")]
    Task(String),
}

impl From<StoreError> for KeyError {
    fn from(e: StoreError) -> Self {
        KeyError::Storage(e.to_string())
    }
}

/// Durable table of fetched keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Insert or replace every row.
    async fn insert_all(&self, keys: Vec<StoredKey>) -> Result<(), StoreError>;

    /// Up to `n` rows of the scope with the greatest expiry, newest first.
    async fn latest_by_expiry(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        n: usize,
    ) -> Result<Vec<StoredKey>, StoreError>;

    /// Like [`KeyStore::latest_by_expiry`], restricted to rows with `expiry > now`.
    async fn latest_active(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        now: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<StoredKey>, StoreError>;

    /// Remove rows of the scope with `expiry <= as_of`; returns how many went.
    async fn delete_expired(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Remove one row by identity; returns whether it existed.
    async fn delete_key(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        key_identifier: &str,
    ) -> Result<bool, StoreError>;

    /// Key types with at least one row, in any scope, whose `expiry <= as_of`.
    async fn key_types_with_expired(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<BTreeSet<KeyType>, StoreError>;

    /// Key types with any row at all.
    async fn key_types_present(&self) -> Result<BTreeSet<KeyType>, StoreError>;
}

/// Durable map from caller-chosen id to request context.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Write a context; an existing id is overwritten.
    async fn put_context(&self, context: RequestContext) -> Result<(), StoreError>;

    async fn get_context(&self, context_id: i64) -> Result<Option<RequestContext>, StoreError>;
}

/// Newest-first, truncated to `n`.
fn newest(mut rows: Vec<StoredKey>, n: usize) -> Vec<StoredKey> {
    rows.sort_by(|a, b| b.expiry.cmp(&a.expiry));
    rows.truncate(n);
    rows
}
