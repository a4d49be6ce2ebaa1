//! Synthesized responses for when both cache and network have failed.

use tracing::{debug, error};

use crate::classify::is_navigation;
use crate::config::RouterConfig;
use crate::request::{Request, Response, ResponseKind};
use crate::store::CacheStorage;

/// Self-contained offline page; it is served precisely when nothing else can
/// be fetched, so it references no external resources.
pub const OFFLINE_PAGE: &str = include_str!("../assets/offline.html");

const UNAVAILABLE_MESSAGE: &str = "The service is currently unavailable";

pub fn offline_page() -> Response {
    Response::new(200, OFFLINE_PAGE)
        .with_header("Content-Type", "text/html; charset=utf-8")
        .with_kind(ResponseKind::Synthetic)
}

pub fn service_unavailable() -> Response {
    Response::new(503, UNAVAILABLE_MESSAGE)
        .with_header("Content-Type", "text/plain; charset=utf-8")
        .with_kind(ResponseKind::Synthetic)
}

/// The offline payload as it is written into the offline store at install.
pub fn offline_data_response(config: &RouterConfig) -> Result<Response, serde_json::Error> {
    let body = serde_json::to_vec(&config.offline_data)?;
    Ok(Response::new(200, body)
        .with_header("Content-Type", "application/json")
        .with_kind(ResponseKind::Synthetic))
}

/// Pick the response for a request nothing else could answer.
///
/// Navigations get the offline page, JSON requests get the stored offline
/// payload, and everything else gets a 503.
pub async fn fallback(
    request: &Request,
    config: &RouterConfig,
    storage: &dyn CacheStorage,
) -> Response {
    if config.offline_page && is_navigation(&request.url) {
        debug!(url = %request.url, "Serving offline page");
        return offline_page();
    }

    if request.accepts_json() {
        let store = config.version.offline_cache_name();
        match storage.get(&store, &config.offline_data_key()).await {
            Ok(Some(entry)) => {
                debug!(url = %request.url, "Serving offline data");
                return entry.response;
            }
            Ok(None) => {}
            Err(e) => {
                error!(url = %request.url, error = %e, "Failed to read offline data");
            }
        }
    }

    service_unavailable()
}
