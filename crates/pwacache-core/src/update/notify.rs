//! User-facing notifications.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::config::{NotificationAction, NotificationConfig};
use crate::error::NotificationError;

/// Title of notifications raised by push messages
const PUSH_TITLE: &str = "PWA Template";

/// Body shown when a push message carries no data
const EMPTY_PUSH_BODY: &str = "No payload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationPermission {
    Granted,
    Denied,
    /// The user has not been asked yet.
    #[default]
    Prompt,
    /// The host has no notification capability at all.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
    pub data: serde_json::Value,
}

impl Notification {
    /// The "new version available" notification.
    pub fn update_available(config: &NotificationConfig, version: &str) -> Self {
        Self {
            title: config.title.clone(),
            body: format!("A new version ({}) is available. Click to update.", version),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            require_interaction: config.require_interaction,
            actions: config.actions.clone(),
            data: serde_json::json!({ "version": version }),
        }
    }

    /// The notification for an incoming push message. Carries no actions.
    pub fn push(config: &NotificationConfig, payload: Option<&str>, now_millis: i64) -> Self {
        Self {
            title: PUSH_TITLE.to_string(),
            body: payload.unwrap_or(EMPTY_PUSH_BODY).to_string(),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            require_interaction: false,
            actions: Vec::new(),
            data: serde_json::json!({ "dateOfArrival": now_millis, "primaryKey": 1 }),
        }
    }
}

/// Show `notification` through `notifier` unless permission is lacking.
pub async fn show_if_permitted(
    notifier: &dyn Notifier,
    notification: Notification,
) -> Result<(), NotificationError> {
    match notifier.permission() {
        NotificationPermission::Granted => notifier.show(notification).await,
        NotificationPermission::Unsupported => Err(NotificationError::Unsupported),
        NotificationPermission::Denied | NotificationPermission::Prompt => {
            Err(NotificationError::PermissionDenied)
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn permission(&self) -> NotificationPermission;

    async fn show(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Notifier for headless hosts: "shows" notifications by logging them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier {
    permission: NotificationPermission,
}

impl LogNotifier {
    pub fn new(permission: NotificationPermission) -> Self {
        Self { permission }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn permission(&self) -> NotificationPermission {
        self.permission
    }

    async fn show(&self, notification: Notification) -> Result<(), NotificationError> {
        let actions: Vec<&str> = notification.actions.iter().map(|a| a.title.as_str()).collect();
        info!(
            title = %notification.title,
            body = %notification.body,
            actions = ?actions,
            "Notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_notification_offers_update_and_later() {
        let notification = Notification::update_available(&NotificationConfig::default(), "4.1.0");
        assert_eq!(notification.title, "PWA Template Update");
        assert!(notification.body.contains("4.1.0"));
        let titles: Vec<&str> = notification.actions.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Update Now", "Later"]);
        assert_eq!(notification.data["version"], "4.1.0");
    }

    #[test]
    fn test_push_notification_shows_payload() {
        let config = NotificationConfig::default();
        let notification = Notification::push(&config, Some("Build finished"), 1_700);
        assert_eq!(notification.title, "PWA Template");
        assert_eq!(notification.body, "Build finished");
        assert_eq!(notification.icon, "/icons/icon-192x192.png");
        assert_eq!(notification.badge, "/icons/icon-192x192.png");
        assert_eq!(notification.vibrate, vec![100, 50, 100]);
        assert!(notification.actions.is_empty());
        assert_eq!(
            notification.data,
            serde_json::json!({"dateOfArrival": 1_700, "primaryKey": 1})
        );

        let empty = Notification::push(&config, None, 0);
        assert_eq!(empty.body, "No payload");
    }

    #[tokio::test]
    async fn test_show_requires_granted_permission() {
        let notification = Notification::push(&NotificationConfig::default(), None, 0);
        let denied = LogNotifier::new(NotificationPermission::Prompt);
        assert_eq!(
            show_if_permitted(&denied, notification.clone()).await,
            Err(NotificationError::PermissionDenied)
        );
        let unsupported = LogNotifier::new(NotificationPermission::Unsupported);
        assert_eq!(
            show_if_permitted(&unsupported, notification.clone()).await,
            Err(NotificationError::Unsupported)
        );
        let granted = LogNotifier::new(NotificationPermission::Granted);
        assert!(show_if_permitted(&granted, notification).await.is_ok());
    }

    #[tokio::test]
    async fn test_log_notifier_accepts() {
        let notifier = LogNotifier::new(NotificationPermission::Granted);
        let notification = Notification::update_available(&NotificationConfig::default(), "1.0.0");
        assert!(notifier.show(notification).await.is_ok());
        assert_eq!(notifier.permission(), NotificationPermission::Granted);
    }
}
