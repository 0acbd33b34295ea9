use std::sync::Arc;

use tracing::{debug, info, warn};

use super::clients::{ClientRegistry, PageMessage};
use super::notify::{show_if_permitted, Notification, Notifier};
use super::version::VersionDescriptor;
use crate::cache::{CacheManager, SweepReport};
use crate::config::{CacheConfig, ACTION_LATER, ACTION_UPDATE};
use crate::error::{NetworkError, NotificationError, StoreError, VersionCheckError};
use crate::net::{FetchMode, Fetcher, Request};

/// Result of one version check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateCheck {
    pub available: bool,
    /// Version reported by the server, if the document could be read.
    pub remote_version: Option<String>,
}

pub struct UpdateManager {
    cache: Arc<CacheManager>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<dyn ClientRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl UpdateManager {
    pub fn new(
        cache: Arc<CacheManager>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<dyn ClientRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            cache,
            fetcher,
            clients,
            notifier,
        }
    }

    fn config(&self) -> &CacheConfig {
        self.cache.config()
    }

    /// Fetch the version document past every cache and compare it with the
    /// running version. Any failure reads as "no update".
    pub async fn check(&self) -> UpdateCheck {
        match self.fetch_descriptor().await {
            Ok(descriptor) => {
                let running = self.config().version();
                info!(current = %running, server = %descriptor.version, "Version check");
                UpdateCheck {
                    available: descriptor.differs_from(running),
                    remote_version: Some(descriptor.version),
                }
            }
            Err(e) => {
                warn!(error = %e, "Update check failed");
                UpdateCheck::default()
            }
        }
    }

    pub async fn check_for_updates(&self) -> bool {
        self.check().await.available
    }

    async fn fetch_descriptor(&self) -> Result<VersionDescriptor, VersionCheckError> {
        let mut url = self
            .config()
            .version_url()
            .map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("t", &self.cache.now_millis().to_string());

        let response = self
            .fetcher
            .fetch(&Request::get(url), FetchMode::NoCache)
            .await?;
        if !response.ok() {
            return Err(VersionCheckError::from_status(response.status, &response.body));
        }
        Ok(VersionDescriptor::from_slice(&response.body)?)
    }

    /// Tell every controlled page that `version` is available. Returns how
    /// many pages the message reached.
    pub async fn notify_clients(&self, version: &str) -> usize {
        let message = PageMessage::UpdateAvailable {
            version: version.to_string(),
            timestamp: self.cache.now_millis(),
        };
        self.broadcast(&message).await
    }

    /// Show the update notification if the host allows it.
    pub async fn notify_user(&self, version: &str) -> Result<(), NotificationError> {
        let notification = Notification::update_available(self.config().notification(), version);
        show_if_permitted(self.notifier.as_ref(), notification).await
    }

    /// Delete every store, then ask every page to reload.
    pub async fn force_update(&self) -> Result<SweepReport, StoreError> {
        info!("Forcing update");
        let report = self.cache.clear_all().await?;
        let message = PageMessage::ForceUpdate {
            timestamp: self.cache.now_millis(),
        };
        let reached = self.broadcast(&message).await;
        info!(stores = report.deleted.len(), pages = reached, "Forced update broadcast");
        Ok(report)
    }

    /// One scheduled check: on a detected update, notify pages and the user.
    /// Every detection notifies again; nothing is remembered between checks.
    pub async fn run_check(&self) -> UpdateCheck {
        let check = self.check().await;
        if check.available {
            let version = check
                .remote_version
                .clone()
                .unwrap_or_else(|| self.config().version().to_string());
            info!(version = %version, "Update available, notifying clients");
            self.notify_clients(&version).await;
            if let Err(e) = self.notify_user(&version).await {
                debug!(error = %e, "Update notification skipped");
            }
        }
        check
    }

    /// React to a click on the update notification.
    pub async fn handle_notification_click(&self, action: Option<&str>) {
        match action {
            Some(ACTION_UPDATE) => {
                if let Err(e) = self.force_update().await {
                    warn!(error = %e, "Forced update from notification failed");
                }
            }
            Some(ACTION_LATER) => debug!("Update postponed"),
            _ => {
                let scope = self.config().scope().clone();
                if let Err(e) = self.clients.open_window(&scope).await {
                    warn!(error = %e, "Failed to open application window");
                }
            }
        }
    }

    async fn broadcast(&self, message: &PageMessage) -> usize {
        let mut reached = 0;
        for page in self.clients.match_all().await {
            match self.clients.post_message(page.id, message).await {
                Ok(()) => reached += 1,
                Err(e) => debug!(client = %page.id, error = %e, "Message not delivered"),
            }
        }
        reached
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::net::Response;
    use crate::store::{CacheStorage, MemoryCacheStorage};
    use crate::testing::{url, MockFetcher, RecordingNotifier, SCOPE};
    use crate::update::{NotificationPermission, PageRegistry};

    struct Fixture {
        updates: UpdateManager,
        storage: Arc<MemoryCacheStorage>,
        fetcher: Arc<MockFetcher>,
        pages: Arc<PageRegistry>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture(permission: NotificationPermission) -> Fixture {
        let config = Arc::new(CacheConfig::new("pwa-template", "4.0.0", SCOPE).unwrap());
        let storage = Arc::new(MemoryCacheStorage::new());
        let fetcher = Arc::new(MockFetcher::new(SCOPE));
        let pages = Arc::new(PageRegistry::new());
        let notifier = Arc::new(RecordingNotifier::new(permission));
        let cache = Arc::new(CacheManager::new(
            config,
            storage.clone(),
            fetcher.clone(),
            Arc::new(ManualClock::new(42)),
        ));
        let updates = UpdateManager::new(cache, fetcher.clone(), pages.clone(), notifier.clone());
        Fixture {
            updates,
            storage,
            fetcher,
            pages,
            notifier,
        }
    }

    fn serve_version(f: &Fixture, version: &str) {
        let body = format!(r#"{{"version":"{}","buildTime":1}}"#, version);
        f.fetcher.respond("/version.json", Response::new(200, body));
    }

    #[tokio::test]
    async fn test_same_version_is_no_update() {
        let f = fixture(NotificationPermission::Granted);
        serve_version(&f, "4.0.0");
        assert!(!f.updates.check_for_updates().await);
    }

    #[tokio::test]
    async fn test_different_version_is_update() {
        let f = fixture(NotificationPermission::Granted);
        serve_version(&f, "4.1.0");
        let check = f.updates.check().await;
        assert!(check.available);
        assert_eq!(check.remote_version.as_deref(), Some("4.1.0"));
    }

    #[tokio::test]
    async fn test_check_busts_caches() {
        let f = fixture(NotificationPermission::Granted);
        serve_version(&f, "4.0.0");
        f.updates.check().await;
        let (called, mode) = f.fetcher.calls()[0].clone();
        assert_eq!(called.path(), "/version.json");
        assert_eq!(called.query(), Some("t=42"));
        assert_eq!(mode, FetchMode::NoCache);
    }

    #[tokio::test]
    async fn test_check_fails_closed() {
        let f = fixture(NotificationPermission::Granted);
        // unreachable
        assert!(!f.updates.check_for_updates().await);

        // non-ok status
        f.fetcher.respond("/version.json", Response::new(500, "down"));
        assert!(!f.updates.check_for_updates().await);

        // malformed document
        f.fetcher.respond("/version.json", Response::new(200, "<html>"));
        assert!(!f.updates.check_for_updates().await);
    }

    #[tokio::test]
    async fn test_notify_clients_reaches_controlled_pages() {
        let f = fixture(NotificationPermission::Granted);
        let (_id, mut rx) = f.pages.connect(url("./")).await;
        let (_other, _rx_other) = f.pages.connect(url("./other")).await;
        f.pages.claim().await;

        assert_eq!(f.updates.notify_clients("4.1.0").await, 2);
        assert_eq!(
            rx.recv().await,
            Some(PageMessage::UpdateAvailable {
                version: "4.1.0".to_string(),
                timestamp: 42
            })
        );
    }

    #[tokio::test]
    async fn test_notify_user_respects_permission() {
        let denied = fixture(NotificationPermission::Denied);
        assert_eq!(
            denied.updates.notify_user("4.1.0").await,
            Err(NotificationError::PermissionDenied)
        );
        assert!(denied.notifier.shown().is_empty());

        let unsupported = fixture(NotificationPermission::Unsupported);
        assert_eq!(
            unsupported.updates.notify_user("4.1.0").await,
            Err(NotificationError::Unsupported)
        );

        let granted = fixture(NotificationPermission::Granted);
        granted.updates.notify_user("4.1.0").await.unwrap();
        assert_eq!(granted.notifier.shown().len(), 1);
    }

    #[tokio::test]
    async fn test_force_update_wipes_all_stores_and_broadcasts() {
        let f = fixture(NotificationPermission::Granted);
        for name in ["pwa-template-v3", "pwa-template-v4", "unrelated"] {
            f.storage.open(name).await.unwrap();
        }
        let (_id, mut rx) = f.pages.connect(url("./")).await;
        f.pages.claim().await;

        f.updates.force_update().await.unwrap();

        let names = f.storage.names().await.unwrap();
        assert!(names.iter().all(|n| !n.starts_with("pwa-template-")));
        assert!(names.is_empty());
        assert_eq!(rx.recv().await, Some(PageMessage::ForceUpdate { timestamp: 42 }));
    }

    #[tokio::test]
    async fn test_run_check_notifies_every_detection() {
        let f = fixture(NotificationPermission::Granted);
        let (_id, mut rx) = f.pages.connect(url("./")).await;
        f.pages.claim().await;
        serve_version(&f, "5.0.0");

        f.updates.run_check().await;
        f.updates.run_check().await;

        assert_eq!(f.notifier.shown().len(), 2);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_run_check_without_update_is_quiet() {
        let f = fixture(NotificationPermission::Granted);
        let (_id, mut rx) = f.pages.connect(url("./")).await;
        f.pages.claim().await;
        serve_version(&f, "4.0.0");

        f.updates.run_check().await;

        assert!(f.notifier.shown().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notification_click_actions() {
        let f = fixture(NotificationPermission::Granted);
        f.storage.open("pwa-template-v4").await.unwrap();

        f.updates.handle_notification_click(Some(ACTION_LATER)).await;
        assert_eq!(f.storage.names().await.unwrap().len(), 1);

        f.updates.handle_notification_click(None).await;
        let pages = f.pages.match_all().await;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].url, url("./"));

        f.updates.handle_notification_click(Some(ACTION_UPDATE)).await;
        assert!(f.storage.names().await.unwrap().is_empty());
    }
}
