//! The cache strategy router.
//!
//! `CacheRouter` is the single entry point a host talks to. It receives the
//! lifecycle events (install, activate), intercepted requests, control
//! messages and sync events, and answers them using a `CacheStorage` and a
//! `Fetcher`.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info};

use crate::background::BackgroundTasks;
use crate::classify::{classify, should_intercept};
use crate::config::RouterConfig;
use crate::control::{send_reply, ControlMessage, ControlReply, ReplySender};
use crate::error::{Result, RouterError};
use crate::lifecycle::{self, Clients, InstallReport, Lifecycle, LifecycleState};
use crate::network::Fetcher;
use crate::request::{Request, Response};
use crate::store::CacheStorage;
use crate::strategy::{select, Executor};

/// Tag of the background sync event the app registers.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Result of routing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not handled; the host performs the request itself.
    PassThrough,
    Respond(Response),
}

impl FetchOutcome {
    pub fn response(self) -> Option<Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::PassThrough => None,
        }
    }
}

/// Clone is cheap; clones share stores, lifecycle and background tasks.
#[derive(Clone)]
pub struct CacheRouter {
    config: Arc<RouterConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    executor: Executor,
    background: BackgroundTasks,
    lifecycle: Arc<Mutex<Lifecycle>>,
    clients: Arc<Mutex<Clients>>,
    /// Serializes activations; held across the store deletions.
    activation: Arc<AsyncMutex<()>>,
}

impl CacheRouter {
    pub fn new(
        config: RouterConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let config = Arc::new(config);
        let background = BackgroundTasks::new();
        let executor = Executor::new(
            config.clone(),
            storage.clone(),
            fetcher.clone(),
            background.clone(),
        );
        Self {
            config,
            storage,
            fetcher,
            executor,
            background,
            lifecycle: Arc::new(Mutex::new(Lifecycle::new())),
            clients: Arc::new(Mutex::new(Clients::default())),
            activation: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle().state()
    }

    pub fn ready_to_activate(&self) -> bool {
        self.lifecycle().ready_to_activate()
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn clients(&self) -> MutexGuard<'_, Clients> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ===== Lifecycle =====

    /// Pre-cache the manifest. Per-entry failures are reported, not returned.
    pub async fn install(&self) -> Result<InstallReport> {
        self.lifecycle().transition(LifecycleState::Installing)?;

        match lifecycle::install(&self.config, self.storage.as_ref(), self.fetcher.as_ref()).await {
            Ok(report) => {
                let mut lifecycle = self.lifecycle();
                lifecycle.transition(LifecycleState::Installed)?;
                lifecycle.skip_waiting();
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "Install failed");
                self.lifecycle().transition(LifecycleState::Uninstalled)?;
                Err(e)
            }
        }
    }

    /// Delete stores of other versions and claim all clients.
    /// Returns the names of the deleted stores; empty if already active.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let _activation = self.activation.lock().await;
        let state = self.state();
        if state == LifecycleState::Active {
            return Ok(Vec::new());
        }
        if state != LifecycleState::Installed {
            return Err(RouterError::InvalidTransition {
                from: state,
                to: LifecycleState::Active,
            });
        }

        let deleted = lifecycle::activate(&self.config, self.storage.as_ref()).await?;
        self.lifecycle().transition(LifecycleState::Active)?;
        let claimed = self.clients().claim();
        info!(deleted = deleted.len(), claimed, "Activated");
        Ok(deleted)
    }

    /// Bring the router to Active: resume if this version's store already
    /// exists, otherwise install and activate.
    pub async fn ensure_active(&self) -> Result<Option<InstallReport>> {
        if self.lifecycle().is_active() {
            return Ok(None);
        }
        let store = self.config.version.cache_name();
        if self.state() == LifecycleState::Uninstalled && self.storage.has(&store).await? {
            self.lifecycle().transition(LifecycleState::Active)?;
            self.clients().claim();
            debug!(store = %store, "Resumed with existing store");
            return Ok(None);
        }
        let report = self.install().await?;
        self.activate().await?;
        Ok(Some(report))
    }

    pub fn register_client(&self, id: u64) {
        let mut clients = self.clients();
        clients.register(id);
        if self.lifecycle().is_active() {
            clients.claim();
        }
    }

    pub fn unregister_client(&self, id: u64) {
        self.clients().unregister(id);
    }

    pub fn is_controlling(&self, id: u64) -> bool {
        self.clients().is_controlled(id)
    }

    /// Fetch the origin once so the fetcher's online flag reflects the
    /// network now. Returns whether the network looks reachable.
    pub async fn check_network(&self) -> bool {
        let request = Request::get(self.config.origin.clone());
        if let Err(e) = self.fetcher.fetch(&request).await {
            debug!(origin = %self.config.origin, error = %e, "Network check failed");
        }
        self.fetcher.is_online()
    }

    // ===== Fetch =====

    /// Route one intercepted request.
    ///
    /// Never fails: store errors are logged and answered with the offline
    /// fallback.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if !should_intercept(request) {
            return FetchOutcome::PassThrough;
        }
        if !self.lifecycle().is_active() {
            debug!(url = %request.url, "Not active, passing request through");
            return FetchOutcome::PassThrough;
        }

        let class = classify(&request.url, &self.config);
        let (strategy, policy) = select(class);
        debug!(url = %request.url, class = %class, strategy = %strategy, "Routing request");

        match self.executor.execute(strategy, policy, request).await {
            Ok(response) => FetchOutcome::Respond(response),
            Err(e) => {
                error!(url = %request.url, error = %e, "Failed to handle request");
                FetchOutcome::Respond(self.executor.fallback(request).await)
            }
        }
    }

    /// Wait for detached background revalidations to finish.
    pub async fn settle(&self) {
        self.background.settle().await;
    }

    pub fn pending_revalidations(&self) -> usize {
        self.background.pending()
    }

    // ===== Messages and sync =====

    pub async fn handle_message(
        &self,
        message: ControlMessage,
        reply_to: Option<ReplySender>,
    ) -> Result<()> {
        if !self.config.control_channel {
            debug!(kind = message.type_name(), "Control channel disabled, ignoring message");
            return Ok(());
        }

        match message {
            ControlMessage::SkipWaiting => {
                self.lifecycle().skip_waiting();
                info!("Skip waiting requested");
            }
            ControlMessage::GetVersion => {
                send_reply(
                    reply_to,
                    ControlReply::Version {
                        version: self.config.version.cache_name(),
                        offline: !self.fetcher.is_online(),
                    },
                );
            }
            ControlMessage::ClearCache => {
                for name in self.storage.names().await? {
                    self.storage.delete(&name).await?;
                    info!(store = %name, "Cleared cache");
                }
                send_reply(reply_to, ControlReply::Cleared { success: true });
            }
            ControlMessage::Unknown(kind) => {
                debug!(kind = %kind, "Unknown control message");
            }
        }
        Ok(())
    }

    /// Background sync events are accepted and logged; nothing else happens.
    pub fn sync(&self, tag: &str) {
        if tag == BACKGROUND_SYNC_TAG {
            info!(tag = tag, "Background sync");
        } else {
            debug!(tag = tag, "Ignoring sync event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::store::MemoryStorage;
    use async_trait::async_trait;
    use url::Url;

    struct Offline;

    #[async_trait]
    impl Fetcher for Offline {
        async fn fetch(&self, request: &Request) -> std::result::Result<Response, FetchError> {
            Err(FetchError::Unreachable(request.url.to_string()))
        }

        fn is_online(&self) -> bool {
            false
        }
    }

    fn router() -> CacheRouter {
        let config = RouterConfig::skytrain(Url::parse("https://kids.example.org/").unwrap());
        CacheRouter::new(config, Arc::new(MemoryStorage::new()), Arc::new(Offline))
    }

    fn get(path: &str) -> Request {
        Request::get(Url::parse("https://kids.example.org/").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_passes_through_until_active() {
        let router = router();
        assert_eq!(router.handle_fetch(&get("/")).await, FetchOutcome::PassThrough);

        router.install().await.unwrap();
        assert_eq!(router.handle_fetch(&get("/")).await, FetchOutcome::PassThrough);

        router.activate().await.unwrap();
        assert!(matches!(router.handle_fetch(&get("/")).await, FetchOutcome::Respond(_)));
    }

    #[tokio::test]
    async fn test_install_requests_skip_waiting() {
        let router = router();
        router.install().await.unwrap();
        assert_eq!(router.state(), LifecycleState::Installed);
        assert!(router.ready_to_activate());
    }

    #[tokio::test]
    async fn test_activate_before_install_fails_without_side_effects() {
        let router = router();
        router.storage().open("skytrain-kids-v0.9").await.unwrap();

        let result = router.activate().await;
        assert!(matches!(result, Err(RouterError::InvalidTransition { .. })));
        assert!(router.storage().has("skytrain-kids-v0.9").await.unwrap());
        assert_eq!(router.state(), LifecycleState::Uninstalled);
    }

    #[tokio::test]
    async fn test_activate_is_idempotent_under_concurrency() {
        let router = router();
        router.storage().open("skytrain-kids-v0.9").await.unwrap();
        router.install().await.unwrap();

        let (first, second) = tokio::join!(router.activate(), router.activate());
        let mut deleted = first.unwrap();
        deleted.extend(second.unwrap());
        assert_eq!(deleted, vec!["skytrain-kids-v0.9".to_string()]);
        assert_eq!(router.state(), LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_check_network_flips_version_reply_offline() {
        let origin = Url::parse("http://127.0.0.1:9/").unwrap();
        let fetcher = crate::network::HttpFetcher::new(origin.clone()).unwrap();
        let router = CacheRouter::new(
            RouterConfig::skytrain(origin),
            Arc::new(MemoryStorage::new()),
            Arc::new(fetcher),
        );

        let (tx, rx) = tokio::sync::oneshot::channel();
        router.handle_message(ControlMessage::GetVersion, Some(tx)).await.unwrap();
        assert!(matches!(rx.await.unwrap(), ControlReply::Version { offline: false, .. }));

        assert!(!router.check_network().await);
        let (tx, rx) = tokio::sync::oneshot::channel();
        router.handle_message(ControlMessage::GetVersion, Some(tx)).await.unwrap();
        assert!(matches!(rx.await.unwrap(), ControlReply::Version { offline: true, .. }));
    }

    #[tokio::test]
    async fn test_activate_claims_clients() {
        let router = router();
        router.register_client(7);
        router.install().await.unwrap();
        assert!(!router.is_controlling(7));

        router.activate().await.unwrap();
        assert!(router.is_controlling(7));

        router.register_client(8);
        assert!(router.is_controlling(8));
    }

    #[tokio::test]
    async fn test_ensure_active_resumes_existing_store() {
        let router = router();
        router.storage().open("skytrain-kids-v1.0").await.unwrap();

        let report = router.ensure_active().await.unwrap();
        assert!(report.is_none());
        assert_eq!(router.state(), LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_ensure_active_installs_when_missing() {
        let router = router();
        let report = router.ensure_active().await.unwrap().unwrap();
        assert!(report.cached.is_empty());
        assert_eq!(report.failed.len(), router.config().manifest.len());
        assert!(router.ensure_active().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_get_passes_through() {
        let router = router();
        router.ensure_active().await.unwrap();
        let mut post = get("/api");
        post.method = reqwest::Method::POST;
        assert_eq!(router.handle_fetch(&post).await, FetchOutcome::PassThrough);
    }

    #[tokio::test]
    async fn test_get_version_reports_offline() {
        let router = router();
        let (tx, rx) = tokio::sync::oneshot::channel();
        router
            .handle_message(ControlMessage::GetVersion, Some(tx))
            .await
            .unwrap();
        assert_eq!(
            rx.await.unwrap(),
            ControlReply::Version {
                version: "skytrain-kids-v1.0".to_string(),
                offline: true,
            }
        );
    }

    #[tokio::test]
    async fn test_skip_waiting_message() {
        let config = RouterConfig::skytrain(Url::parse("https://kids.example.org/").unwrap());
        let router = CacheRouter::new(config, Arc::new(MemoryStorage::new()), Arc::new(Offline));
        router
            .handle_message(ControlMessage::SkipWaiting, None)
            .await
            .unwrap();
        assert!(router.lifecycle().skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_control_channel_disabled() {
        let mut config = RouterConfig::skytrain(Url::parse("https://kids.example.org/").unwrap());
        config.control_channel = false;
        let router = CacheRouter::new(config, Arc::new(MemoryStorage::new()), Arc::new(Offline));

        let (tx, rx) = tokio::sync::oneshot::channel();
        router
            .handle_message(ControlMessage::GetVersion, Some(tx))
            .await
            .unwrap();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_message_is_ignored() {
        let router = router();
        router
            .handle_message(ControlMessage::Unknown("PING".to_string()), None)
            .await
            .unwrap();
    }
}
