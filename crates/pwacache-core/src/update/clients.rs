//! Pages controlled by the worker and the messages pushed to them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use url::Url;

use crate::error::ClientError;

/// Unique identifier for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Messages the worker pushes to pages unprompted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    /// A different version is deployed.
    UpdateAvailable { version: String, timestamp: i64 },
    /// All stores were wiped; the page should reload itself.
    ForceUpdate { timestamp: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub id: ClientId,
    pub url: Url,
    pub focused: bool,
}

/// The host's view of open pages.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Pages currently controlled by this worker.
    async fn match_all(&self) -> Vec<PageInfo>;

    async fn post_message(&self, id: ClientId, message: &PageMessage) -> Result<(), ClientError>;

    /// Take control of every open page. Returns how many were claimed.
    async fn claim(&self) -> usize;

    /// Focus a page already showing `url`, or open a new one.
    async fn open_window(&self, url: &Url) -> Result<ClientId, ClientError>;
}

struct Page {
    url: Url,
    controlled: bool,
    focused: bool,
    sender: mpsc::UnboundedSender<PageMessage>,
    /// Receiver of a window opened by the worker, until a page attaches.
    inbox: Option<mpsc::UnboundedReceiver<PageMessage>>,
}

impl Page {
    fn new(url: Url, controlled: bool, focused: bool) -> (Self, mpsc::UnboundedReceiver<PageMessage>) {
        let (sender, rx) = mpsc::unbounded_channel();
        let page = Self {
            url,
            controlled,
            focused,
            sender,
            inbox: None,
        };
        (page, rx)
    }

    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// In-process registry. Each page receives its messages on an unbounded
/// channel; a page whose receiver is gone is dropped on the next post.
#[derive(Default)]
pub struct PageRegistry {
    pages: RwLock<BTreeMap<ClientId, Page>>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open page. It is not controlled until `claim`.
    pub async fn connect(&self, url: Url) -> (ClientId, mpsc::UnboundedReceiver<PageMessage>) {
        let (page, rx) = Page::new(url, false, false);
        let id = ClientId::next();
        self.pages.write().await.insert(id, page);
        (id, rx)
    }

    /// Take the message receiver of a window opened by `open_window`.
    /// Messages posted before attaching are buffered.
    pub async fn attach(&self, id: ClientId) -> Option<mpsc::UnboundedReceiver<PageMessage>> {
        self.pages.write().await.get_mut(&id)?.inbox.take()
    }

    pub async fn disconnect(&self, id: ClientId) -> bool {
        self.pages.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.pages.read().await.len()
    }
}

#[async_trait]
impl ClientRegistry for PageRegistry {
    async fn match_all(&self) -> Vec<PageInfo> {
        self.pages
            .read()
            .await
            .iter()
            .filter(|(_, page)| page.controlled && page.is_open())
            .map(|(id, page)| PageInfo {
                id: *id,
                url: page.url.clone(),
                focused: page.focused,
            })
            .collect()
    }

    async fn post_message(&self, id: ClientId, message: &PageMessage) -> Result<(), ClientError> {
        let mut pages = self.pages.write().await;
        let page = pages.get(&id).ok_or(ClientError::NotFound(id))?;
        if page.sender.send(message.clone()).is_err() {
            pages.remove(&id);
            debug!(client = %id, "Dropped page that stopped listening");
            return Err(ClientError::Disconnected(id));
        }
        Ok(())
    }

    async fn claim(&self) -> usize {
        let mut pages = self.pages.write().await;
        let mut claimed = 0;
        for page in pages.values_mut().filter(|p| !p.controlled) {
            page.controlled = true;
            claimed += 1;
        }
        claimed
    }

    async fn open_window(&self, url: &Url) -> Result<ClientId, ClientError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::OpenWindow(format!("unsupported scheme in {}", url)));
        }

        let mut pages = self.pages.write().await;
        pages.retain(|_, page| page.is_open());
        for page in pages.values_mut() {
            page.focused = false;
        }
        if let Some((id, page)) = pages.iter_mut().find(|(_, p)| &p.url == url) {
            page.focused = true;
            debug!(client = %id, url = %url, "Focused existing window");
            return Ok(*id);
        }

        let id = ClientId::next();
        let (mut page, rx) = Page::new(url.clone(), true, true);
        page.inbox = Some(rx);
        pages.insert(id, page);
        debug!(client = %id, url = %url, "Opened window");
        Ok(id)
    }
}
