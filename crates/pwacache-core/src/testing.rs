//! In-memory doubles for the host seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::{Origin, Url};

use crate::error::{NetworkError, NotificationError, StoreError};
use crate::net::{FetchMode, Fetcher, Request, Response, ResponseKind};
use crate::store::{CacheStorage, Store};
use crate::update::{Notification, NotificationPermission, Notifier};

pub const SCOPE: &str = "https://app.test/";

pub fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
}

/// Fetcher answering from a table of canned responses keyed by URL path.
/// Unknown paths fail like an unreachable network.
pub struct MockFetcher {
    origin: Origin,
    routes: Mutex<HashMap<String, Response>>,
    calls: Mutex<Vec<(Url, FetchMode)>>,
    offline: AtomicBool,
}

impl MockFetcher {
    pub fn new(scope: &str) -> Self {
        Self {
            origin: Url::parse(scope).unwrap().origin(),
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
        }
    }

    pub fn respond(&self, path: &str, response: Response) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(Url, FetchMode)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.path() == path)
            .count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request, mode: FetchMode) -> Result<Response, NetworkError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.url.clone(), mode));

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Unreachable(request.url.to_string()));
        }

        let response = self
            .routes
            .lock()
            .unwrap()
            .get(request.url.path())
            .cloned()
            .ok_or_else(|| NetworkError::Unreachable(request.url.to_string()))?;

        if request.url.origin() != self.origin && response.kind == ResponseKind::Basic {
            return Ok(response.with_kind(ResponseKind::Cors));
        }
        Ok(response)
    }
}

/// Storage that fails every operation, e.g. after quota exhaustion.
pub struct BrokenStorage;

fn unavailable() -> StoreError {
    StoreError::Unavailable("quota exceeded".to_string())
}

#[async_trait]
impl CacheStorage for BrokenStorage {
    async fn open(&self, _name: &str) -> Result<Arc<dyn Store>, StoreError> {
        Err(unavailable())
    }

    async fn has(&self, _name: &str) -> Result<bool, StoreError> {
        Err(unavailable())
    }

    async fn delete(&self, _name: &str) -> Result<bool, StoreError> {
        Err(unavailable())
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        Err(unavailable())
    }
}

/// Notifier that records what it was asked to show.
pub struct RecordingNotifier {
    permission: NotificationPermission,
    shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new(permission: NotificationPermission) -> Self {
        Self {
            permission,
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn permission(&self) -> NotificationPermission {
        self.permission
    }

    async fn show(&self, notification: Notification) -> Result<(), NotificationError> {
        self.shown.lock().unwrap().push(notification);
        Ok(())
    }
}
