//! Core library for transitcache.
//!
//! An offline-caching agent for a small static site. A `CacheRouter`
//! intercepts requests for the site's assets, classifies them, and answers
//! each one with a caching strategy:
//!
//! - static assets: cache-first
//! - CDN resources: stale-while-revalidate
//! - pages and routes: network-first
//! - anything else: cache-first, storing same-origin responses only
//!
//! When both cache and network fail it synthesizes an offline response.
//! Stores are versioned by name; installing pre-caches a manifest and
//! activating deletes stores from other versions.

pub mod background;
pub mod classify;
pub mod config;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod network;
pub mod offline;
pub mod request;
pub mod router;
pub mod store;
pub mod strategy;

pub use classify::{classify, ResourceClass};
pub use config::{CacheVersion, RouterConfig};
pub use control::{ControlMessage, ControlReply};
pub use error::{FetchError, RouterError, StoreError};
pub use lifecycle::{InstallReport, LifecycleState};
pub use network::{Fetcher, HttpFetcher};
pub use request::{Headers, Request, Response, ResponseKind};
pub use router::{CacheRouter, FetchOutcome};
pub use store::{CacheStorage, CachedEntry, DiskStorage, MemoryStorage};
pub use strategy::Strategy;
pub use url::Url;
