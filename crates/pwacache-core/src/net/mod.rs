//! Network access for the router and the update manager.
//!
//! The core never talks to `reqwest` directly; it goes through the
//! `Fetcher` trait so hosts and tests can substitute their own transport.
//! `HttpFetcher` is the production implementation.

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::NetworkError;

pub use client::HttpFetcher;
pub use types::{cache_key, Destination, FetchMode, Headers, Request, Response, ResponseKind};

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform a network fetch. Resolves with any HTTP status; only transport
    /// failures are errors.
    async fn fetch(&self, request: &Request, mode: FetchMode) -> Result<Response, NetworkError>;
}
