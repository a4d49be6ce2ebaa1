//! Router configuration.
//!
//! Everything that used to be a process-wide constant in a deployment (cache
//! names, the manifest, host allowlists) is carried here and handed to the
//! router at construction, so two versions can run side by side.

use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::error::{Result, RouterError};

/// Version string baked into the SkyTrain deployment.
pub const SKYTRAIN_VERSION: &str = "v1.0";

/// Well-known path of the offline payload inside the offline store.
pub const OFFLINE_DATA_PATH: &str = "/offline-data";

/// Default number of manifest entries fetched at once during install.
const DEFAULT_INSTALL_CONCURRENCY: usize = 4;

const DEFAULT_STATIC_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".png", ".jpg", ".jpeg", ".svg", ".ico", ".woff", ".woff2",
];

const DEFAULT_CDN_HOSTS: &[&str] = &[
    "cdn.tailwindcss.com",
    "fonts.googleapis.com",
    "fonts.gstatic.com",
];

const SKYTRAIN_MANIFEST: &[&str] = &[
    "./",
    "./index.html",
    "./map.html",
    "./calculator.html",
    "./manifest.webmanifest",
    "./icons/icon.svg",
    "https://cdn.tailwindcss.com",
    "https://fonts.googleapis.com/css2?family=Inter:wght@400;500;600;700&display=swap",
];

/// Names of the stores a given code version owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheVersion {
    pub prefix: String,
    pub offline_prefix: String,
    pub version: String,
}

impl CacheVersion {
    pub fn new(
        prefix: impl Into<String>,
        offline_prefix: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            offline_prefix: offline_prefix.into(),
            version: version.into(),
        }
    }

    /// Main store, e.g. `skytrain-kids-v1.0`.
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.prefix, self.version)
    }

    /// Offline payload store, e.g. `skytrain-offline-v1.0`.
    pub fn offline_cache_name(&self) -> String {
        format!("{}-{}", self.offline_prefix, self.version)
    }

    /// Whether a store with this name belongs to the running version.
    pub fn owns(&self, name: &str) -> bool {
        name == self.cache_name() || name == self.offline_cache_name()
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Origin (and scope) of the app; relative manifest entries resolve against it.
    pub origin: Url,
    pub version: CacheVersion,
    /// Resources pre-populated at install, in order.
    pub manifest: Vec<String>,
    pub cdn_hosts: Vec<String>,
    pub static_extensions: Vec<String>,
    pub icons_dir: String,
    pub web_manifest_path: String,
    pub offline_data: serde_json::Value,
    /// Serve the embedded offline page for failed navigations.
    pub offline_page: bool,
    /// Answer control channel messages.
    pub control_channel: bool,
    pub install_concurrency: usize,
}

impl RouterConfig {
    /// Empty configuration for an origin: no manifest, default classification
    /// rules, both optional capabilities off.
    pub fn new(origin: Url, version: CacheVersion) -> Self {
        Self {
            origin,
            version,
            manifest: Vec::new(),
            cdn_hosts: DEFAULT_CDN_HOSTS.iter().map(|s| s.to_string()).collect(),
            static_extensions: DEFAULT_STATIC_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            icons_dir: "/icons/".to_string(),
            web_manifest_path: "/manifest.webmanifest".to_string(),
            offline_data: serde_json::Value::Null,
            offline_page: false,
            control_channel: false,
            install_concurrency: DEFAULT_INSTALL_CONCURRENCY,
        }
    }

    /// The SkyTrain kids map deployment.
    pub fn skytrain(origin: Url) -> Self {
        let version = CacheVersion::new("skytrain-kids", "skytrain-offline", SKYTRAIN_VERSION);
        Self {
            manifest: SKYTRAIN_MANIFEST.iter().map(|s| s.to_string()).collect(),
            offline_data: json!({
                "message": "The app is running in offline mode",
                "routes": "Line and station data is available",
                "calculator": "The trip calculator is available",
            }),
            offline_page: true,
            control_channel: true,
            ..Self::new(origin, version)
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version.version = version.into();
        self
    }

    pub fn with_manifest<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = entries.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve every manifest entry against the origin.
    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        self.manifest
            .iter()
            .map(|entry| {
                self.origin
                    .join(entry)
                    .map_err(|source| RouterError::InvalidManifestEntry {
                        entry: entry.clone(),
                        source,
                    })
            })
            .collect()
    }

    /// Key of the offline payload inside the offline store.
    pub fn offline_data_key(&self) -> String {
        let mut url = self.origin.clone();
        url.set_path(OFFLINE_DATA_PATH);
        url.set_query(None);
        url.set_fragment(None);
        url.to_string()
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }
}
