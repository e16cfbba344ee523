//! [`RedbStore`]: key and context tables in one redb file.
//!
//! Rows are JSON-encoded. redb calls block, so every operation runs on the
//! blocking pool inside a single transaction.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{KeyType, RequestContext, StoredKey};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info};

use super::{newest, ContextStore, KeyStore, StoreError};

// Key: "<key type code>\0<coordinator url or empty>\0<key identifier>", Value: JSON StoredKey
const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("encryption_keys");

// Key: context id, Value: JSON RequestContext
const CONTEXTS: TableDefinition<i64, &[u8]> = TableDefinition::new("request_contexts");

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn codec(e: serde_json::Error) -> StoreError {
    StoreError::Codec(e.to_string())
}

fn row_key(key_type: KeyType, coordinator_url: Option<&str>, key_identifier: &str) -> String {
    format!(
        "{}\0{}\0{}",
        key_type.code(),
        coordinator_url.unwrap_or_default(),
        key_identifier
    )
}

/// Persistent store backed by redb.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create the database at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the file cannot be created or the
    /// tables cannot be initialised.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(backend)?;
            }
        }

        let db = Database::create(path).map_err(backend)?;

        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(KEYS).map_err(backend)?;
        txn.open_table(CONTEXTS).map_err(backend)?;
        txn.commit().map_err(backend)?;

        info!(path = %path.display(), "opened key store");
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn all_keys(db: &Database) -> Result<Vec<StoredKey>, StoreError> {
    let txn = db.begin_read().map_err(backend)?;
    let table = txn.open_table(KEYS).map_err(backend)?;
    let mut rows = Vec::new();
    for entry in table.iter().map_err(backend)? {
        let (_, value) = entry.map_err(backend)?;
        rows.push(serde_json::from_slice(value.value()).map_err(codec)?);
    }
    Ok(rows)
}

#[async_trait]
impl KeyStore for RedbStore {
    async fn insert_all(&self, keys: Vec<StoredKey>) -> Result<(), StoreError> {
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(backend)?;
            {
                let mut table = txn.open_table(KEYS).map_err(backend)?;
                for key in &keys {
                    let id = row_key(key.key_type, key.coordinator_url.as_deref(), &key.key_identifier);
                    let value = serde_json::to_vec(key).map_err(codec)?;
                    table.insert(id.as_str(), value.as_slice()).map_err(backend)?;
                }
            }
            txn.commit().map_err(backend)?;
            debug!(rows = keys.len(), "keys persisted");
            Ok(())
        })
        .await
    }

    async fn latest_by_expiry(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        n: usize,
    ) -> Result<Vec<StoredKey>, StoreError> {
        let coordinator_url = coordinator_url.map(str::to_owned);
        self.blocking(move |db| {
            let rows = all_keys(db)?
                .into_iter()
                .filter(|k| k.in_scope(key_type, coordinator_url.as_deref()))
                .collect();
            Ok(newest(rows, n))
        })
        .await
    }

    async fn latest_active(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        now: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<StoredKey>, StoreError> {
        let coordinator_url = coordinator_url.map(str::to_owned);
        self.blocking(move |db| {
            let rows = all_keys(db)?
                .into_iter()
                .filter(|k| k.in_scope(key_type, coordinator_url.as_deref()) && k.is_active_at(now))
                .collect();
            Ok(newest(rows, n))
        })
        .await
    }

    async fn delete_expired(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let coordinator_url = coordinator_url.map(str::to_owned);
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(backend)?;
            let removed = {
                let mut table = txn.open_table(KEYS).map_err(backend)?;
                let mut doomed = Vec::new();
                for entry in table.iter().map_err(backend)? {
                    let (id, value) = entry.map_err(backend)?;
                    let key: StoredKey = serde_json::from_slice(value.value()).map_err(codec)?;
                    if key.in_scope(key_type, coordinator_url.as_deref()) && key.expiry <= as_of {
                        doomed.push(id.value().to_owned());
                    }
                }
                for id in &doomed {
                    table.remove(id.as_str()).map_err(backend)?;
                }
                doomed.len()
            };
            txn.commit().map_err(backend)?;
            Ok(removed)
        })
        .await
    }

    async fn delete_key(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        key_identifier: &str,
    ) -> Result<bool, StoreError> {
        let id = row_key(key_type, coordinator_url, key_identifier);
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(backend)?;
            let existed = {
                let mut table = txn.open_table(KEYS).map_err(backend)?;
                let removed = table.remove(id.as_str()).map_err(backend)?;
                removed.is_some()
            };
            txn.commit().map_err(backend)?;
            Ok(existed)
        })
        .await
    }

    async fn key_types_with_expired(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<BTreeSet<KeyType>, StoreError> {
        self.blocking(move |db| {
            Ok(all_keys(db)?
                .into_iter()
                .filter(|k| k.expiry <= as_of)
                .map(|k| k.key_type)
                .collect::<BTreeSet<_>>())
        })
        .await
    }

    async fn key_types_present(&self) -> Result<BTreeSet<KeyType>, StoreError> {
        self.blocking(|db| {
            Ok(all_keys(db)?
                .into_iter()
                .map(|k| k.key_type)
                .collect::<BTreeSet<_>>())
        })
            .await
    }
}

#[async_trait]
impl ContextStore for RedbStore {
    async fn put_context(&self, context: RequestContext) -> Result<(), StoreError> {
        self.blocking(move |db| {
            let value = serde_json::to_vec(&context).map_err(codec)?;
            let txn = db.begin_write().map_err(backend)?;
            {
                let mut table = txn.open_table(CONTEXTS).map_err(backend)?;
                table
                    .insert(context.context_id, value.as_slice())
                    .map_err(backend)?;
            }
            txn.commit().map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn get_context(&self, context_id: i64) -> Result<Option<RequestContext>, StoreError> {
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(backend)?;
            let table = txn.open_table(CONTEXTS).map_err(backend)?;
            let Some(value) = table.get(context_id).map_err(backend)? else {
                return Ok(None);
            };
            let context = serde_json::from_slice(value.value()).map_err(codec)?;
            Ok(Some(context))
        })
        .await
    }
}
