use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::StoreError;
use crate::net::{cache_key, FetchMode, Fetcher, Request};
use crate::store::{CacheEntry, CacheStorage, Store};

/// Outcome of deleting a batch of stores.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of one periodic maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub evicted: usize,
}

/// Owns the current store's population and upkeep.
pub struct CacheManager {
    config: Arc<CacheConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
}

impl CacheManager {
    pub fn new(
        config: Arc<CacheConfig>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
            clock,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub async fn open_current(&self) -> Result<Arc<dyn Store>, StoreError> {
        self.storage.open(self.config.store_name()).await
    }

    /// Look up `key` in the current store.
    pub async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        self.open_current().await?.get(key).await
    }

    /// Write `entry` under `key` in the current store.
    pub async fn store(&self, key: &str, entry: CacheEntry) -> Result<(), StoreError> {
        self.open_current().await?.put(key, entry).await
    }

    pub async fn entry_count(&self) -> Result<usize, StoreError> {
        self.open_current().await?.len().await
    }

    // ===== Population =====

    /// Fetch and store each URL independently. Returns the URLs that made it
    /// into the store; failures are logged and left out.
    pub async fn warm_up(&self, urls: &[Url]) -> Result<Vec<Url>, StoreError> {
        let store = self.open_current().await?;

        let attempts = urls.iter().map(|url| {
            let store = store.clone();
            async move {
                match self.warm_one(store.as_ref(), url).await {
                    Ok(()) => Some(url.clone()),
                    Err(e) => {
                        warn!(url = %url, error = %e, "Failed to cache");
                        None
                    }
                }
            }
        });

        let cached: Vec<Url> = join_all(attempts).await.into_iter().flatten().collect();
        info!(
            store = self.config.store_name(),
            cached = cached.len(),
            requested = urls.len(),
            "Warm-up finished"
        );
        Ok(cached)
    }

    async fn warm_one(&self, store: &dyn Store, url: &Url) -> Result<()> {
        let request = Request::get(url.clone());
        let response = self
            .fetcher
            .fetch(&request, FetchMode::Default)
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;
        if !response.ok() {
            bail!("Unexpected status {} for {}", response.status, url);
        }
        store
            .put(&request.cache_key(), CacheEntry::from_response(url, &response))
            .await
            .with_context(|| format!("Failed to store {}", url))?;
        Ok(())
    }

    // ===== Store-level sweeps =====

    /// Delete every application store except the current one.
    pub async fn sweep_stale_stores(&self) -> Result<SweepReport, StoreError> {
        let names = self.storage.names().await?;
        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| self.config.is_stale_store(name))
            .collect();

        if !stale.is_empty() {
            info!(stores = ?stale, "Cleaning old stores");
        }
        Ok(self.delete_stores(stale).await)
    }

    /// Delete every store, current one included.
    pub async fn clear_all(&self) -> Result<SweepReport, StoreError> {
        let names = self.storage.names().await?;
        Ok(self.delete_stores(names).await)
    }

    async fn delete_stores(&self, names: Vec<String>) -> SweepReport {
        let deletions = names.into_iter().map(|name| async move {
            debug!(store = %name, "Deleting store");
            let result = self.storage.delete(&name).await;
            (name, result)
        });

        let mut report = SweepReport::default();
        for (name, result) in join_all(deletions).await {
            match result {
                Ok(_) => report.deleted.push(name),
                Err(e) => {
                    warn!(store = %name, error = %e, "Failed to delete store");
                    report.failed.push(name);
                }
            }
        }
        report
    }

    // ===== Entry-level upkeep =====

    /// Remove entries whose age exceeds the configured max age. Unstamped
    /// entries are left alone. Returns how many were removed.
    pub async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let store = self.open_current().await?;
        let now = self.clock.now_millis();
        let max_age = self.config.max_age_millis();

        let mut expired = Vec::new();
        for key in store.keys().await? {
            let entry = match store.get(&key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read entry during expiry sweep");
                    continue;
                }
            };
            if entry.is_expired(now, max_age) {
                debug!(url = %entry.url, "Removing expired entry");
                expired.push(key);
            }
        }
        if expired.is_empty() {
            return Ok(0);
        }

        let removed = match store.delete_many(&expired).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(store = store.name(), error = %e, "Failed to remove expired entries");
                0
            }
        };

        if removed > 0 {
            info!(store = store.name(), removed, "Expired entries removed");
        }
        Ok(removed)
    }

    /// Evict the oldest entries, by insertion order, until at most
    /// `max_entries` remain. Returns how many were evicted.
    pub async fn enforce_entry_limit(&self) -> Result<usize, StoreError> {
        let store = self.open_current().await?;
        let keys = store.keys().await?;
        let max_entries = self.config.max_entries();
        if keys.len() <= max_entries {
            return Ok(0);
        }

        let excess = keys.len() - max_entries;
        info!(store = store.name(), excess, "Limiting cache entries, deleting old entries");

        let evicted = store.delete_many(&keys[..excess]).await?;
        Ok(evicted)
    }

    /// One periodic pass: expiry sweep, then entry limit. Each half is
    /// independent; a failure is logged and the other half still runs.
    pub async fn maintain(&self) -> MaintenanceReport {
        let expired = self.sweep_expired().await.unwrap_or_else(|e| {
            warn!(error = %e, "Expiry sweep failed");
            0
        });
        let evicted = self.enforce_entry_limit().await.unwrap_or_else(|e| {
            warn!(error = %e, "Entry limit pass failed");
            0
        });
        MaintenanceReport { expired, evicted }
    }

    /// Store key for a scope-relative path such as the offline document.
    pub fn key_for(&self, url: &Url) -> String {
        cache_key(url)
    }
}

// ============================================================================
// Tests
// ============================================================================
