//! Typed commands from pages, answered over a single-use reply port.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::tasks::BackgroundTasks;
use crate::update::UpdateManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    CheckUpdate,
    ForceUpdate,
    ClearCache,
    GetCacheInfo,
}

impl ClientMessage {
    /// Parse a page message. Unknown or untyped messages yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    pub fn expects_reply(&self) -> bool {
        !matches!(self, ClientMessage::ForceUpdate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub store_name: String,
    pub version: String,
    pub entry_count: usize,
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(untagged)]
pub enum ReplyMessage {
    UpdateStatus {
        #[serde(rename = "hasUpdate")]
        has_update: bool,
    },
    Cleared {
        success: bool,
    },
    CacheInfo(CacheInfo),
}

pub type ReplyPort = oneshot::Sender<ReplyMessage>;

pub struct ControlChannel {
    cache: Arc<CacheManager>,
    updates: Arc<UpdateManager>,
    tasks: BackgroundTasks,
}

impl ControlChannel {
    pub fn new(cache: Arc<CacheManager>, updates: Arc<UpdateManager>, tasks: BackgroundTasks) -> Self {
        Self {
            cache,
            updates,
            tasks,
        }
    }

    /// Handle one page message. Replies are sent at most once, on `reply`.
    pub async fn handle(&self, message: &Value, reply: Option<ReplyPort>) {
        let Some(command) = ClientMessage::from_value(message) else {
            debug!(message = %message, "Ignoring unknown message");
            return;
        };
        info!(command = ?command, "Control message");

        let Some(answer) = self.answer(command).await else {
            return;
        };
        match reply {
            Some(port) => {
                if port.send(answer).is_err() {
                    debug!(command = ?command, "Reply port closed before reply");
                }
            }
            None => warn!(command = ?command, "Message expects a reply but carried no port"),
        }
    }

    async fn answer(&self, command: ClientMessage) -> Option<ReplyMessage> {
        let reply = match command {
            ClientMessage::CheckUpdate => ReplyMessage::UpdateStatus {
                has_update: self.updates.check_for_updates().await,
            },
            ClientMessage::ForceUpdate => {
                let updates = self.updates.clone();
                self.tasks.spawn("force-update", async move {
                    updates.force_update().await.map(|_| ())
                });
                return None;
            }
            ClientMessage::ClearCache => {
                let success = match self.cache.sweep_stale_stores().await {
                    Ok(report) => report.is_clean(),
                    Err(e) => {
                        warn!(error = %e, "Failed to list stores");
                        false
                    }
                };
                ReplyMessage::Cleared { success }
            }
            ClientMessage::GetCacheInfo => ReplyMessage::CacheInfo(self.cache_info().await),
        };
        Some(reply)
    }

    async fn cache_info(&self) -> CacheInfo {
        let config = self.cache.config();
        let entry_count = self.cache.entry_count().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to count entries");
            0
        });
        CacheInfo {
            store_name: config.store_name().to_string(),
            version: config.version().to_string(),
            entry_count,
            max_entries: config.max_entries(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
