//! pwacache core - offline cache and self-update controller for a web app.
//!
//! The crate intercepts every request a web application makes, decides per
//! request whether to answer from a local versioned store or the network,
//! keeps that store bounded and fresh, and tells open pages when a new
//! version has been deployed.
//!
//! Host capabilities sit behind traits so any runtime can drive the core:
//! - `store::CacheStorage`: named key→response stores
//! - `net::Fetcher`: network access
//! - `update::ClientRegistry`: the open pages
//! - `update::Notifier`: user-facing notifications
//! - `clock::Clock`: wall-clock time
//!
//! `worker::ServiceWorker` wires everything together and implements
//! `worker::Lifecycle`, the install/activate/fetch/message entry points.

pub mod cache;
pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod net;
pub mod router;
pub mod store;
pub mod tasks;
pub mod update;
pub mod worker;

#[cfg(test)]
mod testing;

pub use cache::{CacheManager, MaintenanceReport, SweepReport};
pub use clock::{Clock, SystemClock};
pub use config::{CacheConfig, DeploymentMetadata, NotificationConfig};
pub use control::{CacheInfo, ClientMessage, ControlChannel, ReplyMessage, ReplyPort};
pub use error::{ClientError, ConfigError, NetworkError, NotificationError, StoreError, VersionCheckError};
pub use net::{Destination, FetchMode, Fetcher, HttpFetcher, Request, Response, ResponseKind};
pub use router::{RequestRouter, Strategy};
pub use store::{CacheEntry, CacheStorage, DiskCacheStorage, MemoryCacheStorage, Store};
pub use tasks::BackgroundTasks;
pub use update::{
    ClientRegistry, LogNotifier, NotificationPermission, Notifier, PageMessage, PageRegistry, UpdateCheck,
    UpdateManager, VersionDescriptor,
};
pub use worker::{ActivateOutcome, HostServices, InstallOutcome, Lifecycle, ServiceWorker};
