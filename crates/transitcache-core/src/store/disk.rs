//! On-disk storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<store name>/<sha256(key)>.entry
//! ```
//!
//! An entry file is one line of JSON metadata (key, status, headers,
//! cached_at), a newline, then the raw body bytes. Entries are written to a
//! temp file and renamed into place, so a reader sees either the old entry or
//! the new one, never a mix.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use super::{validate_name, CacheStorage, CachedEntry};
use crate::error::StoreError;
use crate::request::Response;

/// Application directory name under the platform cache dir.
const APP_NAME: &str = "transitcache";

const ENTRY_EXT: &str = "entry";
const TEMP_EXT: &str = "tmp";

/// Separates the metadata line from the body. Compact JSON never contains a
/// raw newline.
const SEPARATOR: u8 = b'\n';

/// Distinguishes temp files of concurrent writers within this process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// `<platform cache dir>/transitcache`, if the platform has one.
    pub fn default_root() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join(APP_NAME))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn entry_path(&self, name: &str, key: &str) -> Result<PathBuf, StoreError> {
        let stem = hex::encode(Sha256::digest(key.as_bytes()));
        Ok(self.store_dir(name)?.join(format!("{}.{}", stem, ENTRY_EXT)))
    }
}

/// Unique sibling path to write an entry to before renaming it into place.
fn temp_path(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_extension(format!("{}.{}.{}", std::process::id(), n, TEMP_EXT))
}

fn encode_entry(entry: &CachedEntry) -> Result<Vec<u8>, StoreError> {
    let mut bytes = serde_json::to_vec(entry)?;
    bytes.push(SEPARATOR);
    bytes.extend_from_slice(&entry.response.body);
    Ok(bytes)
}

fn decode_entry(bytes: &[u8]) -> Result<CachedEntry, StoreError> {
    let split = bytes
        .iter()
        .position(|b| *b == SEPARATOR)
        .unwrap_or(bytes.len());
    let (meta, rest) = bytes.split_at(split);
    let mut entry: CachedEntry = serde_json::from_slice(meta)?;
    entry.response.body = rest.get(1..).unwrap_or_default().to_vec();
    Ok(entry)
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<(), StoreError> {
        fs::create_dir_all(self.store_dir(name)?).await?;
        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_name(&name).is_err() {
                debug!(dir = %name, "Skipping directory that is not a store");
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        match fs::remove_dir_all(self.store_dir(name)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, name: &str, key: &str) -> Result<Option<CachedEntry>, StoreError> {
        match read_optional(&self.entry_path(name, key)?).await? {
            Some(bytes) => Ok(Some(decode_entry(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, name: &str, key: &str, response: &Response) -> Result<(), StoreError> {
        let path = self.entry_path(name, key)?;
        self.open(name).await?;

        let bytes = encode_entry(&CachedEntry::new(key, response.clone()))?;
        let temp = temp_path(&path);
        fs::write(&temp, bytes).await?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn len(&self, name: &str) -> Result<usize, StoreError> {
        let mut dir = match fs::read_dir(self.store_dir(name)?).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        while let Some(item) = dir.next_entry().await? {
            if item.path().extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT) {
                count += 1;
            }
        }
        Ok(count)
    }
}
