//! Per-process cache and update configuration.
//!
//! `CacheConfig` is built once at startup, optionally adjusted from the
//! deployment metadata document (`version.json`), then frozen behind an
//! `Arc` and handed to every component. Nothing reads configuration from
//! globals.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::ConfigError;

/// Store name prefix shared by every generation of this application
pub const DEFAULT_APP_PREFIX: &str = "pwa-template";

/// Version baked into the running build
pub const DEFAULT_VERSION: &str = "4.0.0";

/// Entries older than a week are refreshed in the background and swept.
const DEFAULT_MAX_AGE_MILLIS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Upper bound on entries in the current store.
const DEFAULT_MAX_ENTRIES: usize = 100;

/// Version document polling interval (30 minutes).
const DEFAULT_CHECK_INTERVAL_MILLIS: u64 = 30 * 60 * 1000;

/// Expiry sweep and entry-limit pass interval (hourly).
const DEFAULT_MAINTENANCE_INTERVAL_MILLIS: u64 = 60 * 60 * 1000;

const DEFAULT_PRECACHE: &[&str] = &[
    "./",
    "./index.html",
    "./styles.css",
    "./app.js",
    "./encrypted-storage.js",
    "./manifest.json",
    "./icons/icon-192x192.png",
    "./icons/icon-512x512.png",
    "./icons/icon.svg",
];

/// Always fetched fresh, never stored.
const DEFAULT_NO_STORE: &[&str] = &["./version.json", "./update-check.json"];

/// Fetched from the network first, store used only as a fallback.
const DEFAULT_NETWORK_FIRST: &[&str] = &["./api/", "./data/"];

const DEFAULT_OFFLINE_DOCUMENT: &str = "./index.html";
const DEFAULT_VERSION_URL: &str = "./version.json";
const DEFAULT_ICON: &str = "/icons/icon-192x192.png";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: Option<String>,
}

/// Appearance of the "update available" notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    pub title: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
}

/// Action id that applies the update.
pub const ACTION_UPDATE: &str = "update";

/// Action id that dismisses the notification.
pub const ACTION_LATER: &str = "later";

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "PWA Template Update".to_string(),
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_ICON.to_string(),
            vibrate: vec![100, 50, 100],
            require_interaction: false,
            actions: vec![
                NotificationAction {
                    action: ACTION_UPDATE.to_string(),
                    title: "Update Now".to_string(),
                    icon: Some(DEFAULT_ICON.to_string()),
                },
                NotificationAction {
                    action: ACTION_LATER.to_string(),
                    title: "Later".to_string(),
                    icon: Some(DEFAULT_ICON.to_string()),
                },
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    app_prefix: String,
    version: String,
    store_name: String,
    scope: Url,
    max_age: Duration,
    max_entries: usize,
    check_interval: Duration,
    maintenance_interval: Duration,
    precache: Vec<String>,
    no_store_patterns: Vec<String>,
    network_first_patterns: Vec<String>,
    offline_document: String,
    version_url: String,
    notification: NotificationConfig,
}

impl CacheConfig {
    /// Configuration for `version` of the app served under `scope`, with the
    /// stock strategy tables. The store name is `<app_prefix>-v<major>`.
    pub fn new(app_prefix: &str, version: &str, scope: &str) -> Result<Self, ConfigError> {
        let scope = Url::parse(scope).map_err(|source| ConfigError::InvalidScope {
            url: scope.to_string(),
            source,
        })?;
        let store_name = format!("{}-v{}", app_prefix, major_version(version)?);

        Ok(Self {
            app_prefix: app_prefix.to_string(),
            version: version.to_string(),
            store_name,
            scope,
            max_age: Duration::from_millis(DEFAULT_MAX_AGE_MILLIS),
            max_entries: DEFAULT_MAX_ENTRIES,
            check_interval: Duration::from_millis(DEFAULT_CHECK_INTERVAL_MILLIS),
            maintenance_interval: Duration::from_millis(DEFAULT_MAINTENANCE_INTERVAL_MILLIS),
            precache: to_owned(DEFAULT_PRECACHE),
            no_store_patterns: to_owned(DEFAULT_NO_STORE),
            network_first_patterns: to_owned(DEFAULT_NETWORK_FIRST),
            offline_document: DEFAULT_OFFLINE_DOCUMENT.to_string(),
            version_url: DEFAULT_VERSION_URL.to_string(),
            notification: NotificationConfig::default(),
        })
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_precache(mut self, paths: Vec<String>) -> Self {
        self.precache = paths;
        self
    }

    pub fn with_no_store_patterns(mut self, patterns: Vec<String>) -> Self {
        self.no_store_patterns = patterns;
        self
    }

    pub fn with_network_first_patterns(mut self, patterns: Vec<String>) -> Self {
        self.network_first_patterns = patterns;
        self
    }

    pub fn with_offline_document(mut self, path: &str) -> Self {
        self.offline_document = path.to_string();
        self
    }

    pub fn with_version_url(mut self, path: &str) -> Self {
        self.version_url = path.to_string();
        self
    }

    pub fn with_notification(mut self, notification: NotificationConfig) -> Self {
        self.notification = notification;
        self
    }

    /// Take `maxAge`, `maxEntries` and `checkInterval` from the deployment
    /// metadata's `cacheConfig`, when present.
    pub fn apply_metadata(mut self, metadata: &DeploymentMetadata) -> Self {
        if let Some(ref cache) = metadata.cache_config {
            if let Some(max_age) = cache.max_age {
                self.max_age = Duration::from_millis(max_age);
            }
            if let Some(max_entries) = cache.max_entries {
                self.max_entries = max_entries;
            }
            if let Some(interval) = cache.check_interval {
                self.check_interval = Duration::from_millis(interval);
            }
        }
        if metadata.version != self.version {
            warn!(
                running = %self.version,
                deployed = %metadata.version,
                "Deployment metadata describes a different version"
            );
        }
        self
    }

    /// Reject values the schedulers cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "checkInterval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.maintenance_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "maintenanceInterval",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.resolve(&self.offline_document)?;
        self.resolve(&self.version_url)?;
        Ok(())
    }

    // ===== Accessors =====

    pub fn app_prefix(&self) -> &str {
        &self.app_prefix
    }

    /// The running build's version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The current store.
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn max_age_millis(&self) -> i64 {
        i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn maintenance_interval(&self) -> Duration {
        self.maintenance_interval
    }

    pub fn notification(&self) -> &NotificationConfig {
        &self.notification
    }

    // ===== Derived values =====

    /// Resolve a scope-relative path such as `./index.html`.
    pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        self.scope.join(path).map_err(|source| ConfigError::InvalidPath {
            path: path.to_string(),
            source,
        })
    }

    /// Precache list as absolute URLs. Unresolvable entries are logged and
    /// dropped.
    pub fn precache_urls(&self) -> Vec<Url> {
        self.precache
            .iter()
            .filter_map(|path| match self.resolve(path) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(path = %path, error = %e, "Skipping precache entry");
                    None
                }
            })
            .collect()
    }

    pub fn offline_document_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.offline_document)
    }

    pub fn version_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.version_url)
    }

    pub fn is_no_store(&self, url: &Url) -> bool {
        matches_any(&self.no_store_patterns, url)
    }

    pub fn is_network_first(&self, url: &Url) -> bool {
        matches_any(&self.network_first_patterns, url)
    }

    /// Whether `name` belongs to this application (any generation).
    pub fn is_app_store(&self, name: &str) -> bool {
        name.starts_with(&format!("{}-", self.app_prefix))
    }

    /// An application store other than the current one.
    pub fn is_stale_store(&self, name: &str) -> bool {
        self.is_app_store(name) && name != self.store_name
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn major_version(version: &str) -> Result<u64, ConfigError> {
    version
        .split('.')
        .next()
        .and_then(|major| major.trim().parse().ok())
        .ok_or_else(|| ConfigError::InvalidVersion(version.to_string()))
}

/// Patterns are written scope-relative (`./api/`). The leading dot is
/// dropped so the remainder matches as a substring of the absolute URL.
fn matches_any(patterns: &[String], url: &Url) -> bool {
    let url = url.as_str();
    patterns.iter().any(|pattern| {
        let needle = pattern.strip_prefix('.').unwrap_or(pattern);
        !needle.is_empty() && url.contains(needle)
    })
}

// ============================================================================
// Deployment metadata
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCacheConfig {
    pub max_age: Option<u64>,
    pub max_entries: Option<usize>,
    pub check_interval: Option<u64>,
}

/// The document written by the release tool next to the app. Only
/// `cacheConfig` is acted on; `changelog` and `features` are free-form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetadata {
    pub version: String,
    #[serde(default)]
    pub build_time: Option<i64>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub changelog: Vec<serde_json::Value>,
    #[serde(default)]
    pub features: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub cache_config: Option<DeploymentCacheConfig>,
}

impl DeploymentMetadata {
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("Failed to parse deployment metadata")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deployment metadata: {}", path.display()))?;
        Self::from_json(&contents)
    }
}
