//! Cache upkeep for the current store generation.
//!
//! The `CacheManager` populates the current store at install time and keeps
//! it bounded afterwards:
//! - stale generations (same app prefix, different name) are deleted
//! - stamped entries older than the max age are swept
//! - the entry count is capped by evicting in insertion order (FIFO)

pub mod manager;

pub use manager::{CacheManager, MaintenanceReport, SweepReport};
