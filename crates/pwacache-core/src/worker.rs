//! The service worker facade: one object owning every component, driven by
//! the host through the `Lifecycle` trait.
//!
//! Activation starts two timers, the update check (`check_interval`) and
//! the maintenance pass (`maintenance_interval`). Both are aborted on
//! `shutdown` or drop.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheManager, MaintenanceReport};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::control::{ControlChannel, ReplyPort};
use crate::error::{ConfigError, NotificationError};
use crate::net::{Fetcher, Request, Response};
use crate::router::RequestRouter;
use crate::store::CacheStorage;
use crate::tasks::BackgroundTasks;
use crate::update::{show_if_permitted, ClientRegistry, Notification, Notifier, UpdateManager};

/// Lifecycle events delivered by the hosting runtime.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Populate the new store generation.
    async fn on_install(&self) -> InstallOutcome;

    /// Take over: drop old generations, claim pages, start timers.
    async fn on_activate(&self) -> ActivateOutcome;

    /// Answer one intercepted request. Never fails.
    async fn on_fetch(&self, request: Request) -> Response;

    async fn on_message(&self, message: Value, reply: Option<ReplyPort>);

    async fn on_maintenance(&self) -> MaintenanceReport;

    async fn on_notification_click(&self, action: Option<String>);

    /// Show the notification for an incoming push message.
    async fn on_push(&self, payload: Option<String>) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOutcome {
    pub cached: Vec<Url>,
    pub stale_deleted: usize,
    /// Activate immediately instead of waiting for old pages to close.
    pub skip_waiting: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivateOutcome {
    pub stale_deleted: usize,
    pub expired: usize,
    pub claimed: usize,
}

/// Host capabilities the worker runs on.
#[derive(Clone)]
pub struct HostServices {
    pub storage: Arc<dyn CacheStorage>,
    pub fetcher: Arc<dyn Fetcher>,
    pub clients: Arc<dyn ClientRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

pub struct ServiceWorker {
    config: Arc<CacheConfig>,
    cache: Arc<CacheManager>,
    router: RequestRouter,
    updates: Arc<UpdateManager>,
    control: ControlChannel,
    clients: Arc<dyn ClientRegistry>,
    notifier: Arc<dyn Notifier>,
    tasks: BackgroundTasks,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceWorker {
    pub fn new(config: CacheConfig, host: HostServices) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        let tasks = BackgroundTasks::new();

        let cache = Arc::new(CacheManager::new(
            config.clone(),
            host.storage,
            host.fetcher.clone(),
            host.clock,
        ));
        let updates = Arc::new(UpdateManager::new(
            cache.clone(),
            host.fetcher.clone(),
            host.clients.clone(),
            host.notifier.clone(),
        ));
        let router = RequestRouter::new(cache.clone(), host.fetcher, tasks.clone());
        let control = ControlChannel::new(cache.clone(), updates.clone(), tasks.clone());

        Ok(Self {
            config,
            cache,
            router,
            updates,
            control,
            clients: host.clients,
            notifier: host.notifier,
            tasks,
            timers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    pub fn updates(&self) -> &UpdateManager {
        &self.updates
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Wait for every fire-and-forget task spawned so far.
    pub async fn settle(&self) {
        self.tasks.settle().await;
    }

    pub fn timers_running(&self) -> usize {
        self.lock_timers().iter().filter(|t| !t.is_finished()).count()
    }

    /// Stop the timers and wait for outstanding background work.
    pub async fn shutdown(&self) {
        self.stop_timers();
        self.tasks.settle().await;
        info!("Service worker stopped");
    }

    fn start_timers(&self) {
        let mut timers = self.lock_timers();
        for timer in timers.drain(..) {
            timer.abort();
        }

        let updates = self.updates.clone();
        let period = self.config.check_interval();
        timers.push(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                updates.run_check().await;
            }
        }));

        let cache = self.cache.clone();
        let period = self.config.maintenance_interval();
        timers.push(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = cache.maintain().await;
                info!(expired = report.expired, evicted = report.evicted, "Maintenance pass");
            }
        }));
    }

    fn stop_timers(&self) {
        for timer in self.lock_timers().drain(..) {
            timer.abort();
        }
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ServiceWorker {
    fn drop(&mut self) {
        self.stop_timers();
    }
}

#[async_trait]
impl Lifecycle for ServiceWorker {
    async fn on_install(&self) -> InstallOutcome {
        info!(store = self.config.store_name(), "Installing");

        let urls = self.config.precache_urls();
        let cached = self.cache.warm_up(&urls).await.unwrap_or_else(|e| {
            warn!(error = %e, "Warm-up failed, store unavailable");
            Vec::new()
        });
        let stale_deleted = match self.cache.sweep_stale_stores().await {
            Ok(report) => report.deleted.len(),
            Err(e) => {
                warn!(error = %e, "Stale store sweep failed");
                0
            }
        };

        InstallOutcome {
            cached,
            stale_deleted,
            skip_waiting: true,
        }
    }

    async fn on_activate(&self) -> ActivateOutcome {
        info!(store = self.config.store_name(), "Activating");

        let (stale, expired, claimed) = tokio::join!(
            self.cache.sweep_stale_stores(),
            self.cache.sweep_expired(),
            self.clients.claim(),
        );
        let stale_deleted = stale.map(|r| r.deleted.len()).unwrap_or_else(|e| {
            warn!(error = %e, "Stale store sweep failed");
            0
        });
        let expired = expired.unwrap_or_else(|e| {
            warn!(error = %e, "Expiry sweep failed");
            0
        });

        let updates = self.updates.clone();
        self.tasks.spawn("update-check", async move {
            updates.run_check().await;
            Ok::<(), Infallible>(())
        });
        self.start_timers();

        info!(stale_deleted, expired, claimed, "Activated");
        ActivateOutcome {
            stale_deleted,
            expired,
            claimed,
        }
    }

    async fn on_fetch(&self, request: Request) -> Response {
        self.router.route(request).await
    }

    async fn on_message(&self, message: Value, reply: Option<ReplyPort>) {
        self.control.handle(&message, reply).await;
    }

    async fn on_maintenance(&self) -> MaintenanceReport {
        self.cache.maintain().await
    }

    async fn on_notification_click(&self, action: Option<String>) {
        self.updates.handle_notification_click(action.as_deref()).await;
    }

    async fn on_push(&self, payload: Option<String>) -> Result<(), NotificationError> {
        info!(has_payload = payload.is_some(), "Push message received");
        let notification = Notification::push(
            self.config.notification(),
            payload.as_deref(),
            self.cache.now_millis(),
        );
        show_if_permitted(self.notifier.as_ref(), notification).await
    }
}

// ============================================================================
// Tests
// ============================================================================
