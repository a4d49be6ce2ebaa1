//! Request classification.
//!
//! Classification is a pure function of the request URL and the router
//! configuration. It decides which caching strategy applies and whether a
//! failed request gets the offline page.

use std::fmt;

use reqwest::Method;
use url::Url;

use crate::config::RouterConfig;
use crate::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    /// Style sheets, scripts, images, fonts, icons, the web manifest.
    Static,
    /// Third-party asset host on the allowlist.
    Cdn,
    /// A full page or virtual route.
    Navigation,
    Default,
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceClass::Static => write!(f, "static"),
            ResourceClass::Cdn => write!(f, "cdn"),
            ResourceClass::Navigation => write!(f, "navigation"),
            ResourceClass::Default => write!(f, "default"),
        }
    }
}

/// Classify a URL. Rules are checked in order: static, cdn, navigation.
pub fn classify(url: &Url, config: &RouterConfig) -> ResourceClass {
    if is_static(url, config) {
        ResourceClass::Static
    } else if is_cdn(url, config) {
        ResourceClass::Cdn
    } else if is_navigation(url) {
        ResourceClass::Navigation
    } else {
        ResourceClass::Default
    }
}

/// Only GET requests over http(s) are handled; everything else is left to
/// the host.
pub fn should_intercept(request: &Request) -> bool {
    request.method == Method::GET && matches!(request.url.scheme(), "http" | "https")
}

fn is_static(url: &Url, config: &RouterConfig) -> bool {
    let path = url.path();
    config
        .static_extensions
        .iter()
        .any(|ext| path.contains(ext.as_str()))
        || path.contains(config.icons_dir.as_str())
        || path == config.web_manifest_path
}

fn is_cdn(url: &Url, config: &RouterConfig) -> bool {
    url.host_str()
        .map(|host| config.cdn_hosts.iter().any(|cdn| cdn == host))
        .unwrap_or(false)
}

pub(crate) fn is_navigation(url: &Url) -> bool {
    let path = url.path();
    path.ends_with(".html") || path == "/" || !path.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RouterConfig {
        RouterConfig::skytrain(Url::parse("https://kids.example.org/").unwrap())
    }

    fn class_of(s: &str) -> ResourceClass {
        classify(&Url::parse(s).unwrap(), &config())
    }

    #[test]
    fn test_classify_static_extensions() {
        assert_eq!(class_of("https://kids.example.org/app.css"), ResourceClass::Static);
        assert_eq!(class_of("https://kids.example.org/js/map.js"), ResourceClass::Static);
        assert_eq!(class_of("https://kids.example.org/img/train.jpeg"), ResourceClass::Static);
        assert_eq!(class_of("https://kids.example.org/favicon.ico"), ResourceClass::Static);
        assert_eq!(
            class_of("https://fonts.gstatic.com/s/inter/v12/font.woff2"),
            ResourceClass::Static
        );
    }

    #[test]
    fn test_classify_extension_match_is_substring() {
        // ".js" appears inside ".json", so data files count as static too
        assert_eq!(class_of("https://kids.example.org/stations.json"), ResourceClass::Static);
    }

    #[test]
    fn test_classify_icons_and_web_manifest() {
        assert_eq!(class_of("https://kids.example.org/icons/192"), ResourceClass::Static);
        assert_eq!(
            class_of("https://kids.example.org/manifest.webmanifest"),
            ResourceClass::Static
        );
    }

    #[test]
    fn test_classify_cdn() {
        assert_eq!(class_of("https://cdn.tailwindcss.com/"), ResourceClass::Cdn);
        assert_eq!(
            class_of("https://fonts.googleapis.com/css2?family=Inter"),
            ResourceClass::Cdn
        );
    }

    #[test]
    fn test_classify_navigation() {
        assert_eq!(class_of("https://kids.example.org/"), ResourceClass::Navigation);
        assert_eq!(class_of("https://kids.example.org/map.html"), ResourceClass::Navigation);
        assert_eq!(class_of("https://kids.example.org/calculator"), ResourceClass::Navigation);
        assert_eq!(class_of("https://other.example.com/route"), ResourceClass::Navigation);
    }

    #[test]
    fn test_classify_default() {
        assert_eq!(class_of("https://kids.example.org/data.xml"), ResourceClass::Default);
        assert_eq!(class_of("https://kids.example.org/readme.txt"), ResourceClass::Default);
    }

    #[test]
    fn test_should_intercept() {
        let url = Url::parse("https://kids.example.org/").unwrap();
        assert!(should_intercept(&Request::get(url.clone())));

        let mut post = Request::get(url);
        post.method = Method::POST;
        assert!(!should_intercept(&post));

        let extension = Request::get(Url::parse("chrome-extension://abc/script.js").unwrap());
        assert!(!should_intercept(&extension));
    }
}
