//! Caching strategies.
//!
//! Each strategy turns a request into a response using the store and the
//! network. Network failures never escape a strategy: they end in a cached
//! entry or the offline fallback. Store failures do escape, and the router
//! answers them with the fallback.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::background::BackgroundTasks;
use crate::classify::ResourceClass;
use crate::config::RouterConfig;
use crate::error::Result;
use crate::network::Fetcher;
use crate::offline;
use crate::request::{Request, Response};
use crate::store::CacheStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::CacheFirst => write!(f, "cache-first"),
            Strategy::NetworkFirst => write!(f, "network-first"),
            Strategy::StaleWhileRevalidate => write!(f, "stale-while-revalidate"),
        }
    }
}

/// Which network responses may be written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    Always,
    /// Keep third-party content out of the store.
    SameOriginOnly,
}

/// Strategy and write policy for a resource class.
pub fn select(class: ResourceClass) -> (Strategy, WritePolicy) {
    match class {
        ResourceClass::Static => (Strategy::CacheFirst, WritePolicy::Always),
        ResourceClass::Cdn => (Strategy::StaleWhileRevalidate, WritePolicy::Always),
        ResourceClass::Navigation => (Strategy::NetworkFirst, WritePolicy::Always),
        ResourceClass::Default => (Strategy::CacheFirst, WritePolicy::SameOriginOnly),
    }
}

/// Runs strategies against a store and a fetcher.
#[derive(Clone)]
pub struct Executor {
    config: Arc<RouterConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    background: BackgroundTasks,
}

impl Executor {
    pub fn new(
        config: Arc<RouterConfig>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        background: BackgroundTasks,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
            background,
        }
    }

    pub async fn execute(
        &self,
        strategy: Strategy,
        policy: WritePolicy,
        request: &Request,
    ) -> Result<Response> {
        match strategy {
            Strategy::CacheFirst => self.cache_first(request, policy).await,
            Strategy::NetworkFirst => self.network_first(request, policy).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, policy).await,
        }
    }

    /// Cached entry if present, otherwise the network (stored when ok).
    pub async fn cache_first(&self, request: &Request, policy: WritePolicy) -> Result<Response> {
        if let Some(cached) = self.lookup(request).await? {
            debug!(url = %request.url, "Served from cache");
            return Ok(cached);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store_if_allowed(request, &response, policy).await?;
                Ok(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Cache miss and network failed");
                Ok(self.fallback(request).await)
            }
        }
    }

    /// Network if reachable (stored when ok), otherwise the cached entry.
    pub async fn network_first(&self, request: &Request, policy: WritePolicy) -> Result<Response> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store_if_allowed(request, &response, policy).await?;
                Ok(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network unavailable, checking cache");
                match self.lookup(request).await? {
                    Some(cached) => Ok(cached),
                    None => Ok(self.fallback(request).await),
                }
            }
        }
    }

    /// Cached entry right away with a detached refresh; without one, the
    /// network outcome.
    pub async fn stale_while_revalidate(
        &self,
        request: &Request,
        policy: WritePolicy,
    ) -> Result<Response> {
        if let Some(cached) = self.lookup(request).await? {
            self.revalidate(request, policy);
            debug!(url = %request.url, "Served stale entry, revalidating in background");
            return Ok(cached);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store_if_allowed(request, &response, policy).await?;
                Ok(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "No cached entry and network failed");
                Ok(self.fallback(request).await)
            }
        }
    }

    pub async fn fallback(&self, request: &Request) -> Response {
        offline::fallback(request, &self.config, self.storage.as_ref()).await
    }

    /// Look the request up in the current store, then in any other store.
    async fn lookup(&self, request: &Request) -> Result<Option<Response>> {
        let key = request.cache_key();
        let current = self.config.version.cache_name();
        if let Some(entry) = self.storage.get(&current, &key).await? {
            return Ok(Some(entry.response));
        }
        for name in self.storage.names().await? {
            if name == current {
                continue;
            }
            if let Some(entry) = self.storage.get(&name, &key).await? {
                return Ok(Some(entry.response));
            }
        }
        Ok(None)
    }

    async fn store_if_allowed(
        &self,
        request: &Request,
        response: &Response,
        policy: WritePolicy,
    ) -> Result<()> {
        if !writable(&self.config, request, response, policy) {
            return Ok(());
        }
        self.storage
            .put(&self.config.version.cache_name(), &request.cache_key(), response)
            .await?;
        debug!(url = %request.url, "Stored in cache");
        Ok(())
    }

    fn revalidate(&self, request: &Request, policy: WritePolicy) {
        let config = self.config.clone();
        let storage = self.storage.clone();
        let fetcher = self.fetcher.clone();
        let request = request.clone();

        self.background.spawn(async move {
            let response = match fetcher.fetch(&request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Background revalidation failed");
                    return;
                }
            };
            if !writable(&config, &request, &response, policy) {
                debug!(url = %request.url, status = response.status, "Revalidation not stored");
                return;
            }
            let store = config.version.cache_name();
            match storage.put(&store, &request.cache_key(), &response).await {
                Ok(()) => debug!(url = %request.url, "Revalidated cache entry"),
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Failed to store revalidated entry")
                }
            }
        });
    }
}

fn writable(
    config: &RouterConfig,
    request: &Request,
    response: &Response,
    policy: WritePolicy,
) -> bool {
    if !response.is_cacheable() {
        return false;
    }
    match policy {
        WritePolicy::Always => true,
        WritePolicy::SameOriginOnly => config.is_same_origin(&request.url),
    }
}
