//! JSON-file backed stores.
//!
//! Each named store lives at `<root>/<name>.json` as an ordered array of
//! `{key, entry}` records. Stores are loaded on first open and written
//! through on every mutation, so a crash loses at most the write in flight.
//! File I/O runs on the blocking pool.
//!
//! Deleting a store orphans any handle still held on it: writes through
//! that handle update its in-memory table but never touch the disk again.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{CacheEntry, CacheStorage, EntryTable, Store, StoredRecord};
use crate::error::StoreError;

/// File extension for store documents
const STORE_EXTENSION: &str = "json";

/// Run blocking filesystem work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Unavailable(format!("filesystem task failed: {}", e)))?
}

pub struct DiskStore {
    name: String,
    path: PathBuf,
    table: Mutex<EntryTable>,
    /// Set under the table lock once the store's file has been removed.
    deleted: AtomicBool,
}

impl DiskStore {
    async fn load(name: &str, path: PathBuf) -> Result<Self, StoreError> {
        let store_name = name.to_string();
        let file = path.clone();
        let table = blocking(move || {
            if !file.exists() {
                let table = EntryTable::default();
                write_table(&file, &table)?;
                return Ok(table);
            }
            let contents = std::fs::read_to_string(&file)?;
            let records: Vec<StoredRecord> =
                serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt {
                    name: store_name,
                    reason: e.to_string(),
                })?;
            Ok(EntryTable::from_records(records))
        })
        .await?;

        debug!(store = name, entries = table.len(), "Opened disk store");
        Ok(Self {
            name: name.to_string(),
            path,
            table: Mutex::new(table),
            deleted: AtomicBool::new(false),
        })
    }

    /// Write `table` to disk. Must be called with the table lock held.
    async fn persist(&self, table: &EntryTable) -> Result<(), StoreError> {
        if self.deleted.load(Ordering::SeqCst) {
            debug!(store = %self.name, "Store was deleted, not persisting");
            return Ok(());
        }
        let contents = serde_json::to_string(&table.to_records())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let path = self.path.clone();
        blocking(move || Ok(std::fs::write(path, contents)?)).await
    }

    async fn mark_deleted(&self) {
        let _table = self.table.lock().await;
        self.deleted.store(true, Ordering::SeqCst);
    }
}

fn write_table(path: &Path, table: &EntryTable) -> Result<(), StoreError> {
    let contents = serde_json::to_string(&table.to_records())
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    std::fs::write(path, contents)?;
    Ok(())
}

#[async_trait]
impl Store for DiskStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.table.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        table.put(key, entry);
        self.persist(&table).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut table = self.table.lock().await;
        let removed = table.delete(key);
        if removed {
            self.persist(&table).await?;
        }
        Ok(removed)
    }

    /// One rewrite of the document for the whole batch.
    async fn delete_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut table = self.table.lock().await;
        let removed = table.delete_many(keys);
        if removed > 0 {
            self.persist(&table).await?;
        }
        Ok(removed)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.table.lock().await.keys())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.table.lock().await.len())
    }
}

pub struct DiskCacheStorage {
    root: PathBuf,
    open_stores: Mutex<HashMap<String, Arc<DiskStore>>>,
}

impl DiskCacheStorage {
    pub fn new(root: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            open_stores: Mutex::new(HashMap::new()),
        })
    }

    /// `<user cache dir>/<app_name>`, if the platform has one.
    pub fn default_root(app_name: &str) -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join(app_name))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, STORE_EXTENSION))
    }
}

/// Store names become file names; refuse anything that could escape the root.
fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StoreError::Unavailable(format!("invalid store name {:?}", name)))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Store>, StoreError> {
        validate_name(name)?;
        let mut open_stores = self.open_stores.lock().await;
        if let Some(store) = open_stores.get(name) {
            return Ok(store.clone());
        }
        let store = Arc::new(DiskStore::load(name, self.store_path(name)).await?);
        open_stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    async fn has(&self, name: &str) -> Result<bool, StoreError> {
        validate_name(name)?;
        let path = self.store_path(name);
        blocking(move || Ok(path.exists())).await
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        validate_name(name)?;
        // Held across the removal so a concurrent open cannot load the file
        // being deleted.
        let mut open_stores = self.open_stores.lock().await;
        if let Some(store) = open_stores.remove(name) {
            store.mark_deleted().await;
        }
        let path = self.store_path(name);
        blocking(move || match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        blocking(move || {
            let mut names = Vec::new();
            for dir_entry in std::fs::read_dir(&root)? {
                let path = dir_entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(STORE_EXTENSION) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
            names.sort();
            Ok(names)
        })
        .await
    }
}
