//! CLI configuration management.
//!
//! Remembers the origin of the site being cached and, optionally, where its
//! stores live. Configuration is stored at `~/.config/transitcache/config.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use transitcache_core::{DiskStorage, Url};

/// Application name used for config directory paths
const APP_NAME: &str = "transitcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    pub origin: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Store root for an origin. Each host gets its own subdirectory so two
    /// sites never share stores.
    pub fn cache_dir(&self, origin: &Url) -> Result<PathBuf> {
        let root = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => DiskStorage::default_root()
                .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?,
        };
        let host = origin.host_str().unwrap_or("local");
        let dir = match origin.port() {
            Some(port) => format!("{}_{}", host, port),
            None => host.to_string(),
        };
        Ok(root.join(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            origin: Some("https://kids.example.org/".to_string()),
            cache_dir: Some(PathBuf::from("/tmp/stores")),
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_cache_dir_per_host() {
        let config = Config {
            origin: None,
            cache_dir: Some(PathBuf::from("/tmp/stores")),
        };
        let origin = Url::parse("https://kids.example.org/skytrain/").unwrap();
        assert_eq!(
            config.cache_dir(&origin).unwrap(),
            PathBuf::from("/tmp/stores/kids.example.org")
        );

        let local = Url::parse("http://localhost:8080/").unwrap();
        assert_eq!(
            config.cache_dir(&local).unwrap(),
            PathBuf::from("/tmp/stores/localhost_8080")
        );
    }

    #[test]
    fn test_corrupt_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
