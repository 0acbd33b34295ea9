//! Version checks and the fan-out that follows a detected update.
//!
//! The flow is: fetch `version.json` past every HTTP cache, compare its
//! `version` with the running one, then tell controlled pages
//! (`UPDATE_AVAILABLE`) and, if permitted, the user (a notification with
//! "Update Now" / "Later" actions). A forced update wipes every store and
//! asks pages to reload (`FORCE_UPDATE`).

pub mod clients;
pub mod manager;
pub mod notify;
pub mod version;

pub use clients::{ClientId, ClientRegistry, PageInfo, PageMessage, PageRegistry};
pub use manager::{UpdateCheck, UpdateManager};
pub use notify::{show_if_permitted, LogNotifier, Notification, NotificationPermission, Notifier};
pub use version::VersionDescriptor;
