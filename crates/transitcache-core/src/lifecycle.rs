//! Install / activate lifecycle.
//!
//! `Lifecycle` is the explicit state machine; `install` and `activate` are
//! the store-side work done on the corresponding transitions.

use std::collections::BTreeSet;
use std::fmt;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::network::Fetcher;
use crate::offline::offline_data_response;
use crate::request::{cache_key, Request};
use crate::store::CacheStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninstalled,
    Installing,
    /// Installed but not yet controlling pages.
    Installed,
    Active,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninstalled => write!(f, "uninstalled"),
            LifecycleState::Installing => write!(f, "installing"),
            LifecycleState::Installed => write!(f, "installed"),
            LifecycleState::Active => write!(f, "active"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
    skip_waiting: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: LifecycleState::Uninstalled,
            skip_waiting: false,
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    /// Move to `to`, or fail if the transition is not allowed.
    ///
    /// Allowed: uninstalled -> installing -> installed -> active,
    /// installing -> uninstalled (install failed), and
    /// uninstalled -> active (resuming with stores already in place).
    pub fn transition(&mut self, to: LifecycleState) -> Result<()> {
        use LifecycleState::*;

        let allowed = matches!(
            (self.state, to),
            (Uninstalled, Installing)
                | (Installing, Installed)
                | (Installing, Uninstalled)
                | (Installed, Active)
                | (Uninstalled, Active)
        );
        if !allowed {
            return Err(RouterError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!(from = %self.state, to = %to, "Lifecycle transition");
        self.state = to;
        Ok(())
    }

    /// Skip the grace period for the previously running instance.
    pub fn skip_waiting(&mut self) {
        self.skip_waiting = true;
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting
    }

    /// Installed and allowed to take over without waiting.
    pub fn ready_to_activate(&self) -> bool {
        self.state == LifecycleState::Installed && self.skip_waiting
    }
}

/// Page clients the router can take control of.
#[derive(Debug, Default)]
pub struct Clients {
    known: BTreeSet<u64>,
    controlled: BTreeSet<u64>,
}

impl Clients {
    pub fn register(&mut self, id: u64) {
        self.known.insert(id);
    }

    pub fn unregister(&mut self, id: u64) {
        self.known.remove(&id);
        self.controlled.remove(&id);
    }

    /// Take control of every known client. Returns how many were newly claimed.
    pub fn claim(&mut self) -> usize {
        let before = self.controlled.len();
        self.controlled.extend(self.known.iter().copied());
        self.controlled.len() - before
    }

    pub fn is_controlled(&self, id: u64) -> bool {
        self.controlled.contains(&id)
    }

    pub fn controlled_count(&self) -> usize {
        self.controlled.len()
    }
}

/// Outcome of an install.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: Vec<String>,
    /// Entries that could not be cached, with the reason.
    pub failed: Vec<(String, String)>,
    pub offline_data_stored: bool,
}

/// Fill the current store with the manifest and the offline payload.
///
/// Every manifest entry is fetched independently; a failing entry is logged
/// and reported but never fails the install. Only a failure to open the
/// store itself is an error.
pub async fn install(
    config: &RouterConfig,
    storage: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
) -> Result<InstallReport> {
    let store = config.version.cache_name();
    storage.open(&store).await?;
    info!(store = %store, entries = config.manifest.len(), "Installing manifest");

    let urls = config.manifest_urls()?;
    let store_name = store.as_str();
    let outcomes: Vec<(Url, std::result::Result<(), String>)> = stream::iter(urls)
        .map(|url| async move {
            let outcome = cache_entry(store_name, &url, storage, fetcher).await;
            (url, outcome)
        })
        .buffered(config.install_concurrency.max(1))
        .collect()
        .await;

    let mut report = InstallReport::default();
    for (url, outcome) in outcomes {
        match outcome {
            Ok(()) => report.cached.push(url.to_string()),
            Err(reason) => {
                warn!(url = %url, reason = %reason, "Failed to cache manifest entry");
                report.failed.push((url.to_string(), reason));
            }
        }
    }

    report.offline_data_stored = store_offline_data(config, storage).await;

    info!(
        cached = report.cached.len(),
        failed = report.failed.len(),
        "Install complete"
    );
    Ok(report)
}

async fn cache_entry(
    store: &str,
    url: &Url,
    storage: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
) -> std::result::Result<(), String> {
    let request = Request::get(url.clone());
    let response = fetcher.fetch(&request).await.map_err(|e| e.to_string())?;
    if !response.is_cacheable() {
        return Err(format!("status {}", response.status));
    }
    storage
        .put(store, &cache_key(url), &response)
        .await
        .map_err(|e| e.to_string())
}

async fn store_offline_data(config: &RouterConfig, storage: &dyn CacheStorage) -> bool {
    if config.offline_data.is_null() {
        return false;
    }
    let response = match offline_data_response(config) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Failed to encode offline data");
            return false;
        }
    };
    let store = config.version.offline_cache_name();
    match storage.put(&store, &config.offline_data_key(), &response).await {
        Ok(()) => true,
        Err(e) => {
            warn!(store = %store, error = %e, "Failed to store offline data");
            false
        }
    }
}

/// Delete every store the running version does not own. Returns the names
/// of the deleted stores.
pub async fn activate(config: &RouterConfig, storage: &dyn CacheStorage) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in storage.names().await? {
        if config.version.owns(&name) {
            continue;
        }
        info!(store = %name, "Deleting old cache");
        if storage.delete(&name).await? {
            deleted.push(name);
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(LifecycleState::Installing).unwrap();
        lifecycle.transition(LifecycleState::Installed).unwrap();
        lifecycle.transition(LifecycleState::Active).unwrap();
        assert!(lifecycle.is_active());
    }

    #[test]
    fn test_failed_install_returns_to_uninstalled() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(LifecycleState::Installing).unwrap();
        lifecycle.transition(LifecycleState::Uninstalled).unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Uninstalled);
    }

    #[test]
    fn test_resume_goes_straight_to_active() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(LifecycleState::Active).unwrap();
        assert!(lifecycle.is_active());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut lifecycle = Lifecycle::new();
        assert!(matches!(
            lifecycle.transition(LifecycleState::Installed),
            Err(RouterError::InvalidTransition {
                from: LifecycleState::Uninstalled,
                to: LifecycleState::Installed,
            })
        ));

        lifecycle.transition(LifecycleState::Active).unwrap();
        assert!(lifecycle.transition(LifecycleState::Installing).is_err());
        assert!(lifecycle.transition(LifecycleState::Active).is_err());
    }

    #[test]
    fn test_ready_to_activate_needs_skip_waiting() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(LifecycleState::Installing).unwrap();
        lifecycle.transition(LifecycleState::Installed).unwrap();
        assert!(!lifecycle.ready_to_activate());

        lifecycle.skip_waiting();
        assert!(lifecycle.ready_to_activate());
    }

    #[test]
    fn test_clients_claim() {
        let mut clients = Clients::default();
        clients.register(1);
        clients.register(2);
        assert!(!clients.is_controlled(1));

        assert_eq!(clients.claim(), 2);
        assert!(clients.is_controlled(1));
        assert_eq!(clients.claim(), 0);

        clients.unregister(2);
        assert_eq!(clients.controlled_count(), 1);
    }
}
