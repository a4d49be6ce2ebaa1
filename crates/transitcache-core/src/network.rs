//! Outbound network fetches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::request::{Headers, Request, Response, ResponseKind};

/// HTTP request timeout in seconds.
/// The router never retries, so this is the only bound on a hung fetch.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Something that can perform a network fetch.
///
/// Non-2xx responses are returned as `Ok`; only transport failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;

    /// Best guess at whether the network is reachable.
    fn is_online(&self) -> bool {
        true
    }
}

/// `reqwest`-backed fetcher.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: Url,
    online: std::sync::Arc<AtomicBool>,
}

impl HttpFetcher {
    /// `origin` decides whether responses are basic (same-origin) or cors.
    pub fn new(origin: Url) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("transitcache/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            origin,
            online: std::sync::Arc::new(AtomicBool::new(true)),
        })
    }

    fn response_kind(&self, url: &Url) -> ResponseKind {
        if url.origin() == self.origin.origin() {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                // only transport-level failures flip the online flag
                if e.is_connect() || e.is_timeout() {
                    self.online.store(false, Ordering::Relaxed);
                }
                debug!(url = %request.url, error = %e, "Network fetch failed");
                return Err(e.into());
            }
        };
        self.online.store(true, Ordering::Relaxed);

        let status = response.status();
        let final_url = response.url().clone();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }
        let body = response.bytes().await?;

        debug!(
            url = %request.url,
            status = status.as_u16(),
            bytes = body.len(),
            "Network fetch complete"
        );

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body: body.to_vec(),
            kind: self.response_kind(&final_url),
            url: Some(final_url.to_string()),
        })
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}
