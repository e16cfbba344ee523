//! [`MemoryStore`]: in-process key and context tables.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{KeyType, RequestContext, StoredKey};
use tokio::sync::RwLock;

use super::{newest, ContextStore, KeyStore, StoreError};

type RowId = (KeyType, Option<String>, String);

fn row_id(key: &StoredKey) -> RowId {
    (
        key.key_type,
        key.coordinator_url.clone(),
        key.key_identifier.clone(),
    )
}

/// Thread-safe in-memory store.
///
/// Cloning shares the underlying tables. Each operation holds one lock for
/// its whole duration, so inserts and prunes are never observed half done.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    keys: Arc<RwLock<HashMap<RowId, StoredKey>>>,
    contexts: Arc<RwLock<HashMap<i64, RequestContext>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of key rows currently held.
    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn insert_all(&self, keys: Vec<StoredKey>) -> Result<(), StoreError> {
        let mut table = self.keys.write().await;
        for key in keys {
            table.insert(row_id(&key), key);
        }
        Ok(())
    }

    async fn latest_by_expiry(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        n: usize,
    ) -> Result<Vec<StoredKey>, StoreError> {
        let table = self.keys.read().await;
        let rows = table
            .values()
            .filter(|k| k.in_scope(key_type, coordinator_url))
            .cloned()
            .collect();
        Ok(newest(rows, n))
    }

    async fn latest_active(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        now: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<StoredKey>, StoreError> {
        let table = self.keys.read().await;
        let rows = table
            .values()
            .filter(|k| k.in_scope(key_type, coordinator_url) && k.is_active_at(now))
            .cloned()
            .collect();
        Ok(newest(rows, n))
    }

    async fn delete_expired(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut table = self.keys.write().await;
        let before = table.len();
        table.retain(|_, k| !(k.in_scope(key_type, coordinator_url) && k.expiry <= as_of));
        Ok(before - table.len())
    }

    async fn delete_key(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
        key_identifier: &str,
    ) -> Result<bool, StoreError> {
        let id = (
            key_type,
            coordinator_url.map(str::to_owned),
            key_identifier.to_owned(),
        );
        Ok(self.keys.write().await.remove(&id).is_some())
    }

    async fn key_types_with_expired(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<BTreeSet<KeyType>, StoreError> {
        let table = self.keys.read().await;
        Ok(table
            .values()
            .filter(|k| k.expiry <= as_of)
            .map(|k| k.key_type)
            .collect())
    }

    async fn key_types_present(&self) -> Result<BTreeSet<KeyType>, StoreError> {
        let table = self.keys.read().await;
        Ok(table.values().map(|k| k.key_type).collect())
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    async fn put_context(&self, context: RequestContext) -> Result<(), StoreError> {
        self.contexts
            .write()
            .await
            .insert(context.context_id, context);
        Ok(())
    }

    async fn get_context(&self, context_id: i64) -> Result<Option<RequestContext>, StoreError> {
        Ok(self.contexts.read().await.get(&context_id).cloned())
    }
}
