//! Named cache stores.
//!
//! A `CacheStorage` holds any number of named stores, each a string-keyed map
//! of responses. Two backends are provided:
//!
//! - `MemoryStorage`: process-local, used by tests and short-lived hosts
//! - `DiskStorage`: one directory per store under a cache root, so entries
//!   survive restarts and can be served offline later

pub mod disk;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::request::Response;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

pub(crate) type CacheEntryMap = std::collections::HashMap<String, CachedEntry>;

/// Storage for named, versioned cache stores.
///
/// Writes are last-write-wins; no implementation locks across calls.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the store if it does not exist yet.
    async fn open(&self, name: &str) -> Result<(), StoreError>;

    /// Names of all existing stores.
    async fn names(&self) -> Result<Vec<String>, StoreError>;

    async fn has(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.names().await?.iter().any(|n| n == name))
    }

    /// Delete a store and all its entries. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;

    async fn get(&self, name: &str, key: &str) -> Result<Option<CachedEntry>, StoreError>;

    /// Insert or overwrite an entry, creating the store if needed.
    async fn put(&self, name: &str, key: &str, response: &Response) -> Result<(), StoreError>;

    /// Number of entries in a store (0 if it does not exist).
    async fn len(&self, name: &str) -> Result<usize, StoreError>;
}

/// A stored response and the time it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub key: String,
    pub response: Response,
    pub cached_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn new(key: impl Into<String>, response: Response) -> Self {
        Self {
            key: key.into(),
            response,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// Store names become directory names, so keep them to a safe alphabet.
pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry_aged(minutes: i64) -> CachedEntry {
        let mut entry = CachedEntry::new("k", Response::new(200, "body"));
        entry.cached_at = Utc::now() - Duration::minutes(minutes);
        entry
    }

    #[test]
    fn test_age_display_just_now() {
        assert_eq!(entry_aged(0).age_display(), "just now");
        assert_eq!(entry_aged(-5).age_display(), "just now");
    }

    #[test]
    fn test_age_display_rounding() {
        assert_eq!(entry_aged(5).age_display(), "5m ago");
        assert_eq!(entry_aged(80).age_display(), "1h ago");
        assert_eq!(entry_aged(95).age_display(), "2h ago");
        assert_eq!(entry_aged(1440 + 60).age_display(), "1d ago");
        assert_eq!(entry_aged(1440 + 13 * 60).age_display(), "2d ago");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("skytrain-kids-v1.0").is_ok());
        assert!(validate_name("cache_v2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("with space").is_err());
    }
}
