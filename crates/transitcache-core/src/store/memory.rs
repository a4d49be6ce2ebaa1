use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{validate_name, CacheEntryMap, CacheStorage, CachedEntry};
use crate::error::StoreError;
use crate::request::Response;

/// In-process storage. Clones share the same stores.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    stores: Arc<RwLock<BTreeMap<String, CacheEntryMap>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, CacheEntryMap>> {
        // a poisoned lock still holds consistent maps: every write is a single insert/remove
        self.stores.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, CacheEntryMap>> {
        self.stores.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        self.write().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read().keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.write().remove(name).is_some())
    }

    async fn get(&self, name: &str, key: &str) -> Result<Option<CachedEntry>, StoreError> {
        Ok(self
            .read()
            .get(name)
            .and_then(|store| store.get(key))
            .cloned())
    }

    async fn put(&self, name: &str, key: &str, response: &Response) -> Result<(), StoreError> {
        validate_name(name)?;
        self.write()
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), CachedEntry::new(key, response.clone()));
        Ok(())
    }

    async fn len(&self, name: &str) -> Result<usize, StoreError> {
        Ok(self.read().get(name).map(HashMap::len).unwrap_or(0))
    }
}
