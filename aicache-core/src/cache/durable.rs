//! Durable tier backends
//!
//! The tiered cache talks to its slow tier through [`DurableStore`]. Two
//! backends ship with the crate: [`MemoryStore`] for tests and single-process
//! use, and [`FileStore`], which keeps one JSON record per key on disk.

use crate::cache::types::CacheKey;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Key-value store backing the durable tier
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Read the record for a key, `None` when absent
    async fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Write (or replace) the record for a key
    async fn write(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<()>;

    /// Remove the record for a key; removing a missing key is not an error
    async fn remove(&self, key: &CacheKey) -> Result<()>;
}

/// Process-local durable store
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<CacheKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn write(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<()> {
        self.records.write().await.insert(*key, bytes);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        self.records.write().await.remove(key);
        Ok(())
    }
}

/// Filesystem durable store
///
/// Records live at `<root>/<first two hex chars>/<hex key>.json` and are
/// written to a temporary file first, then renamed into place.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `root`; directories are created lazily
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record for a key
    pub fn record_path(&self, key: &CacheKey) -> PathBuf {
        let hex = key.to_hex();
        self.root.join(&hex[..2]).join(format!("{}.json", hex))
    }
}

#[async_trait]
impl DurableStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::backend(
                "read",
                format!("{}: {}", path.display(), e),
            )),
        }
    }

    async fn write(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<()> {
        let path = self.record_path(key);
        let dir = path
            .parent()
            .ok_or_else(|| CacheError::backend("write", "record path has no parent"))?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| CacheError::backend("write", format!("{}: {}", dir.display(), e)))?;

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| CacheError::backend("write", format!("{}: {}", tmp.display(), e)))?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::backend(
                "write",
                format!("{}: {}", path.display(), e),
            ));
        }

        debug!("Wrote durable record {}", path.display());
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        let path = self.record_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::backend(
                "remove",
                format!("{}: {}", path.display(), e),
            )),
        }
    }
}
