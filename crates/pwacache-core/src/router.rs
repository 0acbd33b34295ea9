//! Per-request strategy selection and execution.
//!
//! Classification runs in a fixed priority order:
//! 1. non-GET → bypass
//! 2. non-HTTP(S) → bypass
//! 3. no-store pattern → network with cache bypass, `503 Offline` on failure
//! 4. network-first pattern → network, store fallback
//! 5. everything else → cache-first with background refresh
//!
//! Every path resolves to a `Response`; nothing here returns an error.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::CacheManager;
use crate::net::{FetchMode, Fetcher, Request, Response, ResponseKind};
use crate::store::CacheEntry;
use crate::tasks::BackgroundTasks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Bypass,
    NoStore,
    NetworkFirst,
    CacheFirst,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Bypass => "bypass",
            Strategy::NoStore => "no-store",
            Strategy::NetworkFirst => "network-first",
            Strategy::CacheFirst => "cache-first",
        };
        f.write_str(name)
    }
}

pub struct RequestRouter {
    cache: Arc<CacheManager>,
    fetcher: Arc<dyn Fetcher>,
    tasks: BackgroundTasks,
}

impl RequestRouter {
    pub fn new(cache: Arc<CacheManager>, fetcher: Arc<dyn Fetcher>, tasks: BackgroundTasks) -> Self {
        Self {
            cache,
            fetcher,
            tasks,
        }
    }

    pub fn classify(&self, request: &Request) -> Strategy {
        let config = self.cache.config();
        if !request.is_get() || !request.is_http() {
            Strategy::Bypass
        } else if config.is_no_store(&request.url) {
            Strategy::NoStore
        } else if config.is_network_first(&request.url) {
            Strategy::NetworkFirst
        } else {
            Strategy::CacheFirst
        }
    }

    pub async fn route(&self, request: Request) -> Response {
        let strategy = self.classify(&request);
        debug!(url = %request.url, method = %request.method, %strategy, "Routing request");

        match strategy {
            Strategy::Bypass => self.bypass(&request).await,
            Strategy::NoStore => self.no_store(&request).await,
            Strategy::NetworkFirst => self.network_first(&request).await,
            Strategy::CacheFirst => self.cache_first(&request).await,
        }
    }

    async fn bypass(&self, request: &Request) -> Response {
        match self.fetcher.fetch(request, FetchMode::Default).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Bypassed request failed");
                Response::network_error()
            }
        }
    }

    async fn no_store(&self, request: &Request) -> Response {
        match self.fetcher.fetch(request, FetchMode::NoCache).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, error = %e, "No-store request failed, replying offline");
                Response::offline()
            }
        }
    }

    async fn network_first(&self, request: &Request) -> Response {
        let key = request.cache_key();
        match self.fetcher.fetch(request, FetchMode::Default).await {
            Ok(response) => {
                if response.ok() {
                    let entry = CacheEntry::from_response(&request.url, &response);
                    if let Err(e) = self.cache.store(&key, entry).await {
                        warn!(url = %request.url, error = %e, "Failed to store network-first response");
                    }
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network-first fetch failed, trying store");
                match self.cache.lookup(&key).await {
                    Ok(Some(entry)) => entry.to_response(),
                    Ok(None) => Response::network_error(),
                    Err(store_err) => {
                        warn!(url = %request.url, error = %store_err, "Store lookup failed");
                        Response::network_error()
                    }
                }
            }
        }
    }

    async fn cache_first(&self, request: &Request) -> Response {
        let key = request.cache_key();
        let cached = match self.cache.lookup(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Store lookup failed, using network");
                None
            }
        };

        if let Some(entry) = cached {
            debug!(url = %request.url, "Serving from cache");
            let now = self.cache.now_millis();
            if entry.is_expired(now, self.cache.config().max_age_millis()) {
                self.schedule_refresh(request.clone());
            }
            return entry.to_response();
        }

        debug!(url = %request.url, "Fetching from network");
        match self.fetcher.fetch(request, FetchMode::Default).await {
            Ok(response) => {
                if is_cacheable(&response) {
                    self.schedule_store(request, &response);
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Cache miss and network failure");
                self.offline_fallback(request).await
            }
        }
    }

    /// Stamp and store a fresh cache-first response, then trim the store.
    fn schedule_store(&self, request: &Request, response: &Response) {
        let cache = self.cache.clone();
        let key = request.cache_key();
        let entry = CacheEntry::from_response(&request.url, response).stamped(cache.now_millis());

        self.tasks.spawn("store-response", async move {
            cache.store(&key, entry).await?;
            cache.enforce_entry_limit().await?;
            Ok::<(), crate::error::StoreError>(())
        });
    }

    /// Re-fetch a stale entry and overwrite it. Failures are swallowed.
    fn schedule_refresh(&self, request: Request) {
        let cache = self.cache.clone();
        let fetcher = self.fetcher.clone();

        self.tasks.spawn("background-refresh", async move {
            let response = match fetcher.fetch(&request, FetchMode::Default).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Background refresh failed");
                    return Ok(());
                }
            };
            if !response.ok() {
                debug!(url = %request.url, status = response.status, "Background refresh not stored");
                return Ok(());
            }
            let entry =
                CacheEntry::from_response(&request.url, &response).stamped(cache.now_millis());
            cache.store(&request.cache_key(), entry).await?;
            debug!(url = %request.url, "Background refresh stored");
            Ok::<(), crate::error::StoreError>(())
        });
    }

    async fn offline_fallback(&self, request: &Request) -> Response {
        if !request.is_navigation() {
            return Response::offline();
        }

        let document = match self.cache.config().offline_document_url() {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Offline document is not configured correctly");
                return Response::offline();
            }
        };
        match self.cache.lookup(&self.cache.key_for(&document)).await {
            Ok(Some(entry)) => entry.to_response(),
            Ok(None) => {
                debug!(document = %document, "Offline document not in store");
                Response::offline()
            }
            Err(e) => {
                warn!(error = %e, "Store lookup for offline document failed");
                Response::offline()
            }
        }
    }
}

/// Only complete, same-origin successes go into the cache-first store.
fn is_cacheable(response: &Response) -> bool {
    response.status == 200 && response.kind == ResponseKind::Basic
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::clock::{Clock, ManualClock};
    use crate::config::CacheConfig;
    use crate::net::cache_key;
    use crate::store::{CacheStorage, MemoryCacheStorage, CACHE_TIME_HEADER};
    use crate::testing::{url, BrokenStorage, MockFetcher, SCOPE};

    const MAX_AGE: u64 = 60_000;

    struct Fixture {
        router: RequestRouter,
        storage: Arc<MemoryCacheStorage>,
        fetcher: Arc<MockFetcher>,
        clock: Arc<ManualClock>,
        tasks: BackgroundTasks,
    }

    fn fixture_with(config: CacheConfig) -> Fixture {
        let storage = Arc::new(MemoryCacheStorage::new());
        let fetcher = Arc::new(MockFetcher::new(SCOPE));
        let clock = Arc::new(ManualClock::new(10_000_000));
        let tasks = BackgroundTasks::new();
        let cache = Arc::new(CacheManager::new(
            Arc::new(config),
            storage.clone(),
            fetcher.clone(),
            clock.clone(),
        ));
        let router = RequestRouter::new(cache, fetcher.clone(), tasks.clone());
        Fixture {
            router,
            storage,
            fetcher,
            clock,
            tasks,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            CacheConfig::new("pwa-template", "4.0.0", SCOPE)
                .unwrap()
                .with_max_age(Duration::from_millis(MAX_AGE)),
        )
    }

    fn html(body: &str) -> Response {
        Response::new(200, body).with_header("content-type", "text/html")
    }

    async fn stored(f: &Fixture, path: &str) -> Option<CacheEntry> {
        let store = f.storage.open("pwa-template-v4").await.unwrap();
        store.get(&cache_key(&url(path))).await.unwrap()
    }

    #[test]
    fn test_classification_priority() {
        let f = fixture();
        let post = Request::new("POST", url("./api/data"));
        assert_eq!(f.router.classify(&post), Strategy::Bypass);

        let extension = Request::get(url::Url::parse("chrome-extension://abc/x.js").unwrap());
        assert_eq!(f.router.classify(&extension), Strategy::Bypass);

        let version = Request::get(url("./version.json"));
        assert_eq!(f.router.classify(&version), Strategy::NoStore);

        let api = Request::get(url("./api/data"));
        assert_eq!(f.router.classify(&api), Strategy::NetworkFirst);

        let page = Request::get(url("./index.html"));
        assert_eq!(f.router.classify(&page), Strategy::CacheFirst);
    }

    #[tokio::test]
    async fn test_cache_miss_stores_stamped_and_returns_unmodified() {
        let f = fixture();
        f.fetcher.respond("/index.html", html("<h1>hi</h1>"));

        let response = f.router.route(Request::get(url("./index.html"))).await;

        assert_eq!(response, html("<h1>hi</h1>"));
        assert_eq!(response.header(CACHE_TIME_HEADER), None);

        f.tasks.settle().await;
        let entry = stored(&f, "./index.html").await.unwrap();
        assert_eq!(entry.body, b"<h1>hi</h1>");
        assert_eq!(entry.status, 200);
        assert_eq!(entry.stored_at_millis, Some(f.clock.now_millis()));
    }

    #[tokio::test]
    async fn test_cache_hit_round_trip_before_expiry() {
        let f = fixture();
        f.fetcher.respond("/index.html", html("v1"));
        f.router.route(Request::get(url("./index.html"))).await;
        f.tasks.settle().await;

        f.clock.advance(MAX_AGE as i64);
        f.fetcher.respond("/index.html", html("v2"));
        let response = f.router.route(Request::get(url("./index.html"))).await;
        f.tasks.settle().await;

        assert!(response.from_cache);
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"v1");
        assert!(response.header(CACHE_TIME_HEADER).is_some());
        // Not past max age: no refresh issued
        assert_eq!(f.fetcher.calls_to("/index.html"), 1);
    }

    #[tokio::test]
    async fn test_stale_hit_serves_cached_then_refreshes() {
        let f = fixture();
        f.fetcher.respond("/index.html", html("v1"));
        f.router.route(Request::get(url("./index.html"))).await;
        f.tasks.settle().await;
        let first_stamp = stored(&f, "./index.html").await.unwrap().stored_at_millis;

        f.clock.advance(MAX_AGE as i64 + 1);
        f.fetcher.respond("/index.html", html("v2"));
        let response = f.router.route(Request::get(url("./index.html"))).await;

        assert_eq!(response.body, b"v1");
        assert!(response.from_cache);

        f.tasks.settle().await;
        assert_eq!(f.fetcher.calls_to("/index.html"), 2);
        let refreshed = stored(&f, "./index.html").await.unwrap();
        assert_eq!(refreshed.body, b"v2");
        assert!(refreshed.stored_at_millis > first_stamp);
    }

    #[tokio::test]
    async fn test_stale_refresh_failure_is_swallowed() {
        let f = fixture();
        f.fetcher.respond("/app.js", Response::new(200, "old"));
        f.router.route(Request::get(url("./app.js"))).await;
        f.tasks.settle().await;

        f.clock.advance(MAX_AGE as i64 + 1);
        f.fetcher.set_offline(true);
        let response = f.router.route(Request::get(url("./app.js"))).await;
        f.tasks.settle().await;

        assert_eq!(response.body, b"old");
        assert_eq!(stored(&f, "./app.js").await.unwrap().body, b"old");
    }

    #[tokio::test]
    async fn test_non_200_and_cross_origin_not_stored() {
        let f = fixture();
        f.fetcher.respond("/missing.html", Response::new(404, "nope"));
        f.fetcher.respond("/lib.js", Response::new(200, "lib"));

        let missing = f.router.route(Request::get(url("./missing.html"))).await;
        let cross = f
            .router
            .route(Request::get(url::Url::parse("https://cdn.test/lib.js").unwrap()))
            .await;
        f.tasks.settle().await;

        assert_eq!(missing.status, 404);
        assert_eq!(cross.kind, ResponseKind::Cors);
        let store = f.storage.open("pwa-template-v4").await.unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_partial_content_not_stored() {
        let f = fixture();
        f.fetcher.respond("/video.mp4", Response::new(206, "part"));
        f.router.route(Request::get(url("./video.mp4"))).await;
        f.tasks.settle().await;
        assert!(stored(&f, "./video.mp4").await.is_none());
    }

    #[tokio::test]
    async fn test_miss_store_enforces_entry_limit() {
        let f = fixture_with(
            CacheConfig::new("pwa-template", "4.0.0", SCOPE)
                .unwrap()
                .with_max_entries(2),
        );
        for path in ["/a.js", "/b.js", "/c.js"] {
            f.fetcher.respond(path, Response::new(200, path));
            f.router.route(Request::get(url(path))).await;
            f.tasks.settle().await;
        }
        let store = f.storage.open("pwa-template-v4").await.unwrap();
        assert_eq!(
            store.keys().await.unwrap(),
            vec![cache_key(&url("/b.js")), cache_key(&url("/c.js"))]
        );
    }

    #[tokio::test]
    async fn test_navigation_falls_back_to_offline_document() {
        let f = fixture();
        let store = f.storage.open("pwa-template-v4").await.unwrap();
        store
            .put(
                &cache_key(&url("./index.html")),
                CacheEntry::from_response(&url("./index.html"), &html("shell")),
            )
            .await
            .unwrap();
        f.fetcher.set_offline(true);

        let page = f.router.route(Request::navigate(url("./about.html"))).await;
        assert_eq!(page.body, b"shell");
        assert!(page.from_cache);

        let image = f.router.route(Request::get(url("./logo.png"))).await;
        assert_eq!(image.status, 503);
        assert_eq!(image.body, b"Offline");
    }

    #[tokio::test]
    async fn test_navigation_without_offline_document_is_503() {
        let f = fixture();
        f.fetcher.set_offline(true);
        let page = f.router.route(Request::navigate(url("./about.html"))).await;
        assert_eq!(page.status, 503);
    }

    #[tokio::test]
    async fn test_network_first_stores_success() {
        let f = fixture();
        f.fetcher.respond("/api/data", Response::new(200, r#"{"n":1}"#));

        let response = f.router.route(Request::get(url("./api/data"))).await;

        assert_eq!(response.body, br#"{"n":1}"#);
        assert!(!response.from_cache);
        let entry = stored(&f, "./api/data").await.unwrap();
        assert_eq!(entry.body, br#"{"n":1}"#);
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_store() {
        let f = fixture();
        f.fetcher.respond("/api/data", Response::new(200, "cached"));
        f.router.route(Request::get(url("./api/data"))).await;

        f.fetcher.set_offline(true);
        let response = f.router.route(Request::get(url("./api/data"))).await;
        assert_eq!(response.body, b"cached");
        assert!(response.from_cache);
    }

    #[tokio::test]
    async fn test_network_first_offline_without_entry_is_network_error() {
        let f = fixture();
        f.fetcher.set_offline(true);
        let response = f.router.route(Request::get(url("./api/data"))).await;
        assert!(response.is_network_error());
        assert_ne!(response.status, 503);
    }

    #[tokio::test]
    async fn test_network_first_error_status_passes_through_unstored() {
        let f = fixture();
        f.fetcher.respond("/api/data", Response::new(500, "boom"));
        let response = f.router.route(Request::get(url("./api/data"))).await;
        assert_eq!(response.status, 500);
        assert!(stored(&f, "./api/data").await.is_none());
    }

    #[tokio::test]
    async fn test_no_store_bypasses_cache_and_goes_offline() {
        let f = fixture();
        f.fetcher.respond("/version.json", Response::new(200, r#"{"version":"4.0.0"}"#));

        let response = f.router.route(Request::get(url("./version.json"))).await;
        f.tasks.settle().await;
        assert_eq!(response.status, 200);
        assert!(stored(&f, "./version.json").await.is_none());
        assert_eq!(f.fetcher.calls()[0].1, FetchMode::NoCache);

        f.fetcher.set_offline(true);
        let offline = f.router.route(Request::get(url("./version.json"))).await;
        assert_eq!(offline.status, 503);
        assert_eq!(offline.body, b"Offline");
    }

    #[tokio::test]
    async fn test_non_get_is_never_cached() {
        let f = fixture();
        f.fetcher.respond("/index.html", html("posted"));
        let response = f.router.route(Request::new("POST", url("./index.html"))).await;
        f.tasks.settle().await;
        assert_eq!(response.body, b"posted");
        assert!(stored(&f, "./index.html").await.is_none());

        f.fetcher.set_offline(true);
        let failed = f.router.route(Request::new("PUT", url("./index.html"))).await;
        assert!(failed.is_network_error());
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_network() {
        let fetcher = Arc::new(MockFetcher::new(SCOPE));
        let cache = Arc::new(CacheManager::new(
            Arc::new(CacheConfig::new("pwa-template", "4.0.0", SCOPE).unwrap()),
            Arc::new(BrokenStorage),
            fetcher.clone(),
            Arc::new(ManualClock::new(0)),
        ));
        let tasks = BackgroundTasks::new();
        let router = RequestRouter::new(cache, fetcher.clone(), tasks.clone());
        fetcher.respond("/index.html", html("live"));

        let response = router.route(Request::get(url("./index.html"))).await;
        tasks.settle().await;
        assert_eq!(response.body, b"live");

        fetcher.set_offline(true);
        let offline = router.route(Request::get(url("./index.html"))).await;
        assert_eq!(offline.status, 503);
    }
}
