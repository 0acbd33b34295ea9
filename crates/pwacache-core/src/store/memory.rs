use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStorage, EntryTable, Store};
use crate::error::StoreError;

/// A store living in process memory.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    table: RwLock<EntryTable>,
}

impl MemoryStore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: RwLock::new(EntryTable::default()),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.table.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), StoreError> {
        self.table.write().await.put(key, entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.table.write().await.delete(key))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        Ok(self.table.write().await.delete_many(keys))
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.table.read().await.keys())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.table.read().await.len())
    }
}

/// In-process `CacheStorage`. Stores are listed in creation order.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    stores: RwLock<Vec<Arc<MemoryStore>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Store>, StoreError> {
        let mut stores = self.stores.write().await;
        if let Some(existing) = stores.iter().find(|s| s.name == name) {
            return Ok(existing.clone());
        }
        let store = Arc::new(MemoryStore::new(name));
        stores.push(store.clone());
        Ok(store)
    }

    async fn has(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.stores.read().await.iter().any(|s| s.name == name))
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let mut stores = self.stores.write().await;
        let before = stores.len();
        stores.retain(|s| s.name != name);
        Ok(stores.len() != before)
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .stores
            .read()
            .await
            .iter()
            .map(|s| s.name.clone())
            .collect())
    }
}
