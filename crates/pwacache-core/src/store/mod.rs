//! Named, versioned key→response stores.
//!
//! A `CacheStorage` holds any number of named stores (one per build
//! generation, e.g. `pwa-template-v4`). Each `Store` maps a canonical
//! request key to a `CacheEntry` and remembers insertion order, which is
//! what entry-count eviction walks.
//!
//! Two backends are provided:
//! - `MemoryCacheStorage`: process-local, used by tests and embedders
//! - `DiskCacheStorage`: one JSON document per store under the cache dir

pub mod disk;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::StoreError;
use crate::net::{Headers, Response, ResponseKind};

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// Header layered onto store-served responses, carrying the time the entry
/// was written (ms since epoch).
pub const CACHE_TIME_HEADER: &str = "sw-cache-time";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Write time. Entries without one never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at_millis: Option<i64>,
}

impl CacheEntry {
    /// Snapshot a network response for `url`, without a timestamp.
    pub fn from_response(url: &Url, response: &Response) -> Self {
        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            body: response.body.clone(),
            stored_at_millis: None,
        }
    }

    pub fn stamped(mut self, now_millis: i64) -> Self {
        self.stored_at_millis = Some(now_millis);
        self
    }

    pub fn age_millis(&self, now_millis: i64) -> Option<i64> {
        self.stored_at_millis
            .map(|stored| now_millis.saturating_sub(stored))
    }

    /// Strictly older than `max_age_millis`. Unstamped entries never expire.
    pub fn is_expired(&self, now_millis: i64, max_age_millis: i64) -> bool {
        self.age_millis(now_millis)
            .map(|age| age > max_age_millis)
            .unwrap_or(false)
    }

    /// Rebuild the response to hand back to the page. The body is returned
    /// untouched; only the cache-time header is layered on.
    pub fn to_response(&self) -> Response {
        let mut headers = self.headers.clone();
        if let Some(stored) = self.stored_at_millis {
            headers.insert(CACHE_TIME_HEADER.to_string(), stored.to_string());
        }
        Response {
            status: self.status,
            status_text: self.status_text.clone(),
            headers,
            body: self.body.clone(),
            kind: ResponseKind::Basic,
            from_cache: true,
        }
    }
}

/// One named store.
#[async_trait]
pub trait Store: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or overwrite. Overwriting keeps the key's original position.
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove every key in `keys`. Returns how many were present.
    async fn delete_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Keys in insertion order.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.keys().await?.len())
    }
}

/// The set of named stores available to the application.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open (creating if needed) the store called `name`. Opening the same
    /// name twice yields handles onto the same data.
    async fn open(&self, name: &str) -> Result<Arc<dyn Store>, StoreError>;

    async fn has(&self, name: &str) -> Result<bool, StoreError>;

    async fn delete(&self, name: &str) -> Result<bool, StoreError>;

    /// Names of all existing stores.
    async fn names(&self) -> Result<Vec<String>, StoreError>;
}

/// Insertion-ordered entry map shared by the backends.
#[derive(Debug, Default, Clone)]
pub(crate) struct EntryTable {
    order: Vec<String>,
    entries: HashMap<String, CacheEntry>,
}

/// On-disk shape of one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub key: String,
    pub entry: CacheEntry,
}

impl EntryTable {
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: &str, entry: CacheEntry) {
        if self.entries.insert(key.to_string(), entry).is_none() {
            self.order.push(key.to_string());
        }
    }

    pub fn delete(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    pub fn delete_many(&mut self, keys: &[String]) -> usize {
        let before = self.order.len();
        for key in keys {
            self.entries.remove(key);
        }
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
        before - self.order.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn to_records(&self) -> Vec<StoredRecord> {
        self.order
            .iter()
            .filter_map(|key| {
                self.entries.get(key).map(|entry| StoredRecord {
                    key: key.clone(),
                    entry: entry.clone(),
                })
            })
            .collect()
    }

    pub fn from_records(records: Vec<StoredRecord>) -> Self {
        let mut table = Self::default();
        for record in records {
            table.put(&record.key, record.entry);
        }
        table
    }
}
